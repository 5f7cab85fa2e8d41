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

//! Permission capture and restore.
//!
//! rsync runs with ownership and permission sync disabled; instead the
//! sealed payload tree is walked after the sync and every path is
//! recorded in the file-info store, keyed by its absolute source path
//! as raw bytes. On restore the recorded metadata is compared against
//! the live filesystem and reapplied, one decision at a time, reporting
//! each action through a callback. A missing user or group on the
//! restoring host degrades to the live numeric id.

use std::{
    collections::BTreeMap,
    ffi::OsStr,
    fs,
    os::unix::ffi::OsStrExt,
    os::unix::fs::MetadataExt,
    os::unix::fs::PermissionsExt,
    path::Path,
};

use anyhow::{Context, Result};

use crate::{
    repository::{fileinfo::FileInfo, sid::Sid},
    users,
};

/// uid/gid → name maps harvested while walking a snapshot. Stored in
/// the snapshot info file so a restore on a different host can still
/// translate them.
#[derive(Debug, Default)]
pub struct IdMaps {
    pub users: BTreeMap<u32, String>,
    pub groups: BTreeMap<u32, String>,
}

/// Records one path into the store. Symbolic links are recorded by
/// their own metadata, not their target's.
pub fn save_path_info(
    file_info: &mut FileInfo,
    key: &[u8],
    full_path: &Path,
    maps: &mut IdMaps,
) {
    let Ok(meta) = fs::symlink_metadata(full_path) else {
        return;
    };

    let user = maps
        .users
        .entry(meta.uid())
        .or_insert_with(|| users::get_user_name(meta.uid()))
        .clone();
    let group = maps
        .groups
        .entry(meta.gid())
        .or_insert_with(|| users::get_group_name(meta.gid()))
        .clone();

    file_info.record(key, meta.mode(), user.as_bytes(), group.as_bytes());
}

/// Walks the payload tree of `sid` depth-first and records every path.
pub fn save_permissions(sid: &Sid, file_info: &mut FileInfo, maps: &mut IdMaps) -> Result<()> {
    let root = sid.backup_path();
    walk(&root, &root, file_info, maps)
}

fn walk(root: &Path, dir: &Path, file_info: &mut FileInfo, maps: &mut IdMaps) -> Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Could not list '{}'", dir.display()))?;

    for entry in entries.flatten() {
        let path = entry.path();
        save_path_info(file_info, &key_for(root, &path), &path, maps);

        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            walk(root, &path, file_info, maps)?;
        }
    }

    Ok(())
}

/// The absolute source path of an entry inside the payload tree, as
/// raw bytes.
fn key_for(root: &Path, path: &Path) -> Vec<u8> {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut key = vec![b'/'];
    key.extend_from_slice(relative.as_os_str().as_bytes());
    key
}

/// Reapplies the recorded metadata of `key` onto `path`. Every action
/// is reported through `callback`; failed actions gain a `FAILED`
/// suffix. Returns true if any permission restore failed. If the
/// recorded metadata equals the live metadata, nothing happens and the
/// callback is not invoked.
pub fn restore_path_info<F>(
    key: &[u8],
    path: &[u8],
    file_info: &FileInfo,
    callback: &mut F,
) -> bool
where
    F: FnMut(&str),
{
    let Some(entry) = file_info.lookup(key) else {
        return false;
    };

    let os_path = Path::new(OsStr::from_bytes(path));
    let Ok(meta) = fs::symlink_metadata(os_path) else {
        return false;
    };

    let mut failed = false;
    let display = String::from_utf8_lossy(path);

    let uid = users::get_uid(&entry.user, Some(meta.uid() as i64));
    let gid = users::get_gid(&entry.group, Some(meta.gid() as i64));

    if meta.uid() as i64 != uid || meta.gid() as i64 != gid {
        if meta.uid() as i64 == uid {
            // only the group differs
            let ok = std::os::unix::fs::chown(os_path, None, Some(gid as u32)).is_ok();
            report(callback, ok, &format!("chgrp {display} {gid}"), &mut failed);
        } else {
            let ok =
                std::os::unix::fs::chown(os_path, Some(uid as u32), Some(gid as u32)).is_ok();
            report(
                callback,
                ok,
                &format!("chown {display} {uid} : {gid}"),
                &mut failed,
            );
        }
    }

    if meta.mode() != entry.mode {
        let ok =
            fs::set_permissions(os_path, fs::Permissions::from_mode(entry.mode & 0o7777)).is_ok();
        report(
            callback,
            ok,
            &format!("chmod {display} {:04o}", entry.mode & 0o7777),
            &mut failed,
        );
    }

    failed
}

fn report<F>(callback: &mut F, ok: bool, message: &str, failed: &mut bool)
where
    F: FnMut(&str),
{
    if ok {
        callback(message);
    } else {
        *failed = true;
        callback(&format!("{message} : FAILED"));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::tempdir;

    use crate::config::Config;

    use super::*;

    fn entry_for(path: &Path) -> (u32, String, String) {
        let meta = fs::symlink_metadata(path).unwrap();
        (
            meta.mode(),
            users::get_user_name(meta.uid()),
            users::get_group_name(meta.gid()),
        )
    }

    #[test]
    fn test_save_path_info() -> Result<()> {
        let tmp = tempdir()?;
        let dir = tmp.path().join("dir");
        let file = tmp.path().join("file");
        fs::create_dir(&dir)?;
        fs::write(&file, "bar")?;

        fs::set_permissions(&dir, fs::Permissions::from_mode(0o775))?;
        fs::set_permissions(&file, fs::Permissions::from_mode(0o664))?;

        let mut file_info = FileInfo::new();
        let mut maps = IdMaps::default();
        save_path_info(&mut file_info, b"/dir", &dir, &mut maps);
        save_path_info(&mut file_info, b"/file", &file, &mut maps);

        let dir_entry = file_info.lookup(b"/dir").unwrap();
        assert_eq!(dir_entry.mode, 0o40775);
        assert_eq!(dir_entry.user, users::current_user_name().as_bytes());
        assert_eq!(dir_entry.group, users::current_group_name().as_bytes());

        let file_entry = file_info.lookup(b"/file").unwrap();
        assert_eq!(file_entry.mode, 0o100664);

        assert!(maps.users.contains_key(&users::current_uid()));
        assert!(maps.groups.contains_key(&users::current_gid()));

        Ok(())
    }

    #[test]
    fn test_save_permissions_walks_the_payload() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = Config::new(tmp.path().join("config"));
        cfg.set_snapshots_path(&tmp.path().join("snapshots"));
        cfg.set_data_path(&tmp.path().join("data"));
        let cfg = Arc::new(cfg);

        let sid = Sid::new("20151219-010324-123", cfg)?;
        sid.make_dirs_to("/tmp/foo/bar")?;
        fs::write(sid.backup_path_to("/tmp/foo/bar/baz"), "foo")?;
        std::os::unix::fs::symlink("baz", sid.backup_path_to("/tmp/foo/bar/link"))?;

        let mut file_info = FileInfo::new();
        let mut maps = IdMaps::default();
        save_permissions(&sid, &mut file_info, &mut maps)?;

        assert!(file_info.contains(b"/tmp"));
        assert!(file_info.contains(b"/tmp/foo"));
        assert!(file_info.contains(b"/tmp/foo/bar"));
        assert!(file_info.contains(b"/tmp/foo/bar/baz"));
        assert!(file_info.contains(b"/tmp/foo/bar/link"));

        // the symlink is recorded by its own lstat metadata
        let link = file_info.lookup(b"/tmp/foo/bar/link").unwrap();
        assert_eq!(link.mode & 0o170000, 0o120000);

        Ok(())
    }

    #[test]
    fn test_restore_no_changes() -> Result<()> {
        let tmp = tempdir()?;
        let dir = tmp.path().join("foo");
        let file = tmp.path().join("bar");
        fs::create_dir(&dir)?;
        fs::write(&file, "")?;

        let mut file_info = FileInfo::new();
        for (key, path) in [(b"foo".as_slice(), &dir), (b"bar".as_slice(), &file)] {
            let (mode, user, group) = entry_for(path);
            file_info.record(key, mode, user.as_bytes(), group.as_bytes());
        }

        let mut callback = |message: &str| {
            panic!("callback fired unexpectedly: {message}");
        };
        assert!(!restore_path_info(
            b"foo",
            dir.as_os_str().as_bytes(),
            &file_info,
            &mut callback
        ));
        assert!(!restore_path_info(
            b"bar",
            file.as_os_str().as_bytes(),
            &file_info,
            &mut callback
        ));

        Ok(())
    }

    #[test]
    fn test_restore_change_permissions() -> Result<()> {
        let tmp = tempdir()?;
        let dir = tmp.path().join("foo");
        let file = tmp.path().join("bar");
        fs::create_dir(&dir)?;
        fs::write(&file, "")?;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o775))?;
        fs::set_permissions(&file, fs::Permissions::from_mode(0o664))?;

        let user = users::current_user_name();
        let group = users::current_group_name();

        let mut file_info = FileInfo::new();
        file_info.record(b"foo", 0o40700, user.as_bytes(), group.as_bytes());
        file_info.record(b"bar", 0o100600, user.as_bytes(), group.as_bytes());

        let mut messages = Vec::new();
        let mut callback = |message: &str| messages.push(message.to_string());

        assert!(!restore_path_info(
            b"foo",
            dir.as_os_str().as_bytes(),
            &file_info,
            &mut callback
        ));
        assert!(!restore_path_info(
            b"bar",
            file.as_os_str().as_bytes(),
            &file_info,
            &mut callback
        ));

        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("chmod "));
        assert!(messages[0].ends_with(" 0700"));
        assert!(messages[1].ends_with(" 0600"));

        assert_eq!(fs::metadata(&dir)?.mode(), 0o40700);
        assert_eq!(fs::metadata(&file)?.mode(), 0o100600);

        Ok(())
    }

    #[test]
    fn test_restore_change_owner_without_root() -> Result<()> {
        if users::current_uid() == 0 {
            eprintln!("running as root, skipping");
            return Ok(());
        }

        let tmp = tempdir()?;
        let file = tmp.path().join("bar");
        fs::write(&file, "")?;

        let (mode, _, group) = entry_for(&file);
        let mut file_info = FileInfo::new();
        file_info.record(b"bar", mode, b"root", group.as_bytes());

        let mut messages = Vec::new();
        let mut callback = |message: &str| messages.push(message.to_string());

        assert!(restore_path_info(
            b"bar",
            file.as_os_str().as_bytes(),
            &file_info,
            &mut callback
        ));

        assert_eq!(messages.len(), 1);
        let expected = format!(
            "chown {} 0 : {} : FAILED",
            file.display(),
            users::current_gid()
        );
        assert_eq!(messages[0], expected);

        // nothing actually changed
        assert_eq!(fs::metadata(&file)?.uid(), users::current_uid());

        Ok(())
    }

    #[test]
    fn test_restore_unknown_user_degrades_to_live_id() -> Result<()> {
        let tmp = tempdir()?;
        let file = tmp.path().join("bar");
        fs::write(&file, "")?;

        let (mode, _, group) = entry_for(&file);
        let mut file_info = FileInfo::new();
        file_info.record(b"bar", mode, b"nonExistingUser", group.as_bytes());

        // resolver falls back to the live uid, so nothing differs
        let mut callback = |message: &str| {
            panic!("callback fired unexpectedly: {message}");
        };
        assert!(!restore_path_info(
            b"bar",
            file.as_os_str().as_bytes(),
            &file_info,
            &mut callback
        ));

        Ok(())
    }

    #[test]
    fn test_restore_missing_key_is_a_no_op() {
        let file_info = FileInfo::new();
        let mut callback = |message: &str| {
            panic!("callback fired unexpectedly: {message}");
        };
        assert!(!restore_path_info(
            b"missing",
            b"/nonexistent",
            &file_info,
            &mut callback
        ));
    }
}
