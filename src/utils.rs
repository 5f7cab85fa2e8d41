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

use std::{
    ffi::CStr,
    fs,
    os::unix::fs::PermissionsExt,
    path::Path,
};

use anyhow::{Context, Result};

/// The machine's hostname, or "localhost" if it cannot be determined.
pub fn hostname() -> String {
    let mut buf = [0 as libc::c_char; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr(), buf.len() - 1) };
    if rc != 0 {
        return String::from("localhost");
    }

    // gethostname does not guarantee termination on truncation
    buf[buf.len() - 1] = 0;
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// Mount points of all currently mounted filesystems, in mount order.
/// Returns an empty list on systems without /proc/mounts.
pub fn filesystem_mount_points() -> Vec<String> {
    let Ok(mounts) = fs::read_to_string("/proc/mounts") else {
        return Vec::new();
    };

    let mut points = Vec::new();
    for line in mounts.lines() {
        if let Some(point) = line.split_whitespace().nth(1) {
            let point = point.to_string();
            if !points.contains(&point) {
                points.push(point);
            }
        }
    }

    points
}

/// Restores user write and exec bits on every directory below `path`
/// (inclusive) so that a read-only snapshot tree can be removed.
pub fn make_dirs_writable(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("Could not stat '{}'", path.display()))?;

    if !meta.is_dir() {
        return Ok(());
    }

    let mut permissions = meta.permissions();
    if permissions.mode() & 0o300 != 0o300 {
        permissions.set_mode(permissions.mode() | 0o300);
        fs::set_permissions(path, permissions)
            .with_context(|| format!("Could not make '{}' writable", path.display()))?;
    }

    for entry in fs::read_dir(path)
        .with_context(|| format!("Could not list '{}'", path.display()))?
        .flatten()
    {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            make_dirs_writable(&entry.path())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_hostname() {
        let name = hostname();
        assert!(!name.is_empty());
    }

    #[test]
    fn test_filesystem_mount_points() {
        let points = filesystem_mount_points();
        if !points.is_empty() {
            assert!(points.contains(&String::from("/")));
        }
    }

    #[test]
    fn test_make_dirs_writable() -> Result<()> {
        let tmp = tempdir()?;
        let outer = tmp.path().join("outer");
        let inner = outer.join("inner");
        fs::create_dir_all(&inner)?;
        fs::write(inner.join("file"), b"mapachito")?;

        fs::set_permissions(&inner, fs::Permissions::from_mode(0o500))?;
        fs::set_permissions(&outer, fs::Permissions::from_mode(0o500))?;

        make_dirs_writable(&outer)?;

        assert_eq!(
            fs::symlink_metadata(&outer)?.permissions().mode() & 0o300,
            0o300
        );
        assert_eq!(
            fs::symlink_metadata(&inner)?.permissions().mode() & 0o300,
            0o300
        );
        fs::remove_dir_all(&outer)?;

        Ok(())
    }
}
