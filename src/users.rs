// coati is an incremental backup tool
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! User and group name/id translations.
//!
//! Lookups never fail hard: an unknown name degrades to the caller
//! supplied backup id (or `-1`), an unknown id degrades to the `"-"`
//! sentinel. Names are accepted as text or raw bytes interchangeably,
//! since they come both from configuration files and from the file-info
//! store, which keeps them as bytes.

use std::ffi::{CStr, CString};

/// Sentinel returned for ids that have no name on this system.
pub const UNKNOWN_NAME: &str = "-";

const INITIAL_BUF_SIZE: usize = 1024;
const MAX_BUF_SIZE: usize = 1 << 20;

fn name_cstring<N: AsRef<[u8]>>(name: N) -> Option<CString> {
    CString::new(name.as_ref().to_vec()).ok()
}

fn uid_of<N: AsRef<[u8]>>(name: N) -> Option<u32> {
    let cname = name_cstring(name)?;
    let mut buf_size = INITIAL_BUF_SIZE;

    loop {
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut buf = vec![0 as libc::c_char; buf_size];
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = unsafe {
            libc::getpwnam_r(
                cname.as_ptr(),
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf_size < MAX_BUF_SIZE {
            buf_size *= 2;
            continue;
        }

        return if rc == 0 && !result.is_null() {
            Some(pwd.pw_uid)
        } else {
            None
        };
    }
}

fn gid_of<N: AsRef<[u8]>>(name: N) -> Option<u32> {
    let cname = name_cstring(name)?;
    let mut buf_size = INITIAL_BUF_SIZE;

    loop {
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut buf = vec![0 as libc::c_char; buf_size];
        let mut result: *mut libc::group = std::ptr::null_mut();

        let rc = unsafe {
            libc::getgrnam_r(
                cname.as_ptr(),
                &mut grp,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf_size < MAX_BUF_SIZE {
            buf_size *= 2;
            continue;
        }

        return if rc == 0 && !result.is_null() {
            Some(grp.gr_gid)
        } else {
            None
        };
    }
}

/// Resolves a user name to its uid. Returns `backup` (or `-1`) if the
/// name is unknown.
pub fn get_uid<N: AsRef<[u8]>>(name: N, backup: Option<i64>) -> i64 {
    match uid_of(name) {
        Some(uid) => uid as i64,
        None => backup.unwrap_or(-1),
    }
}

/// Resolves a group name to its gid. Returns `backup` (or `-1`) if the
/// name is unknown.
pub fn get_gid<N: AsRef<[u8]>>(name: N, backup: Option<i64>) -> i64 {
    match gid_of(name) {
        Some(gid) => gid as i64,
        None => backup.unwrap_or(-1),
    }
}

/// Resolves a uid to its user name, or [`UNKNOWN_NAME`].
pub fn get_user_name(uid: u32) -> String {
    let mut buf_size = INITIAL_BUF_SIZE;

    loop {
        let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut buf = vec![0 as libc::c_char; buf_size];
        let mut result: *mut libc::passwd = std::ptr::null_mut();

        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &mut pwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf_size < MAX_BUF_SIZE {
            buf_size *= 2;
            continue;
        }

        return if rc == 0 && !result.is_null() {
            unsafe { CStr::from_ptr(pwd.pw_name) }
                .to_string_lossy()
                .into_owned()
        } else {
            String::from(UNKNOWN_NAME)
        };
    }
}

/// Resolves a gid to its group name, or [`UNKNOWN_NAME`].
pub fn get_group_name(gid: u32) -> String {
    let mut buf_size = INITIAL_BUF_SIZE;

    loop {
        let mut grp: libc::group = unsafe { std::mem::zeroed() };
        let mut buf = vec![0 as libc::c_char; buf_size];
        let mut result: *mut libc::group = std::ptr::null_mut();

        let rc = unsafe {
            libc::getgrgid_r(
                gid,
                &mut grp,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };

        if rc == libc::ERANGE && buf_size < MAX_BUF_SIZE {
            buf_size *= 2;
            continue;
        }

        return if rc == 0 && !result.is_null() {
            unsafe { CStr::from_ptr(grp.gr_name) }
                .to_string_lossy()
                .into_owned()
        } else {
            String::from(UNKNOWN_NAME)
        };
    }
}

pub fn current_uid() -> u32 {
    unsafe { libc::geteuid() }
}

pub fn current_gid() -> u32 {
    unsafe { libc::getegid() }
}

pub fn current_user_name() -> String {
    get_user_name(current_uid())
}

pub fn current_group_name() -> String {
    get_group_name(current_gid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_uid_valid() {
        assert_eq!(get_uid("root", None), 0);
        assert_eq!(get_uid(b"root", None), 0);

        let user = current_user_name();
        assert_eq!(get_uid(&user, None), current_uid() as i64);
        assert_eq!(get_uid(user.as_bytes(), None), current_uid() as i64);
    }

    #[test]
    fn test_get_uid_invalid() {
        assert_eq!(get_uid("nonExistingUser", None), -1);
        assert_eq!(get_uid(b"nonExistingUser".as_slice(), None), -1);
    }

    #[test]
    fn test_get_uid_backup() {
        assert_eq!(get_uid("root", Some(99999)), 0);
        assert_eq!(get_uid("nonExistingUser", Some(99999)), 99999);
        assert_eq!(get_uid(b"nonExistingUser".as_slice(), Some(99999)), 99999);
    }

    #[test]
    fn test_get_gid_valid() {
        assert_eq!(get_gid("root", None), 0);
        assert_eq!(get_gid(b"root", None), 0);

        let group = current_group_name();
        assert_eq!(get_gid(&group, None), current_gid() as i64);
    }

    #[test]
    fn test_get_gid_invalid() {
        assert_eq!(get_gid("nonExistingGroup", None), -1);
        assert_eq!(get_gid("nonExistingGroup", Some(99999)), 99999);
    }

    #[test]
    fn test_get_user_name() {
        assert_eq!(get_user_name(0), "root");
        assert_eq!(get_user_name(99999), UNKNOWN_NAME);
    }

    #[test]
    fn test_get_group_name() {
        assert_eq!(get_group_name(0), "root");
        assert_eq!(get_group_name(99999), UNKNOWN_NAME);
    }

    #[test]
    fn test_name_with_interior_nul_is_a_miss() {
        assert_eq!(get_uid(b"ro\0ot".as_slice(), None), -1);
    }
}
