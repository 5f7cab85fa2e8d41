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

//! Repository enumeration and the last-snapshot symlink.

pub mod fileinfo;
pub mod retention;
pub mod sid;

use std::{fs, sync::Arc};

use anyhow::{Context, Result};

use crate::{
    config::Config,
    global::defaults,
    repository::sid::{SID_REGEX, Sid},
};

/// Lists the sealed snapshots in the repository. Entries must match the
/// snapshot-identifier pattern and contain a payload root; everything
/// else is skipped. With `include_new`, the New sentinel is included
/// when its directory is valid. Sorted oldest first, or newest first
/// when `reverse` is set (the default for most callers).
pub fn list_snapshots(cfg: &Arc<Config>, include_new: bool, reverse: bool) -> Vec<Sid> {
    let mut snapshots = Vec::new();

    if let Ok(entries) = fs::read_dir(cfg.snapshots_path()) {
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if !SID_REGEX.is_match(name) {
                continue;
            }
            let Ok(sid) = Sid::new(name, cfg.clone()) else {
                continue;
            };
            if sid.exists() {
                snapshots.push(sid);
            }
        }
    }

    snapshots.sort();
    if reverse {
        snapshots.reverse();
    }

    if include_new {
        let new = Sid::new_snapshot(cfg.clone());
        if new.exists() {
            if reverse {
                snapshots.insert(0, new);
            } else {
                snapshots.push(new);
            }
        }
    }

    snapshots
}

/// Iterates the sealed snapshots, newest first.
pub fn iter_snapshots(cfg: &Arc<Config>) -> impl Iterator<Item = Sid> {
    list_snapshots(cfg, false, true).into_iter()
}

/// The most recent sealed snapshot, if any.
pub fn last_snapshot(cfg: &Arc<Config>) -> Option<Sid> {
    list_snapshots(cfg, false, true).into_iter().next()
}

/// Atomically repoints the last-snapshot symlink at `sid`. The symlink
/// is relative so the repository can be moved as a whole.
pub fn create_last_snapshot_symlink(cfg: &Arc<Config>, sid: &Sid) -> Result<()> {
    let symlink = cfg.last_snapshot_symlink();
    let tmp_symlink = symlink.with_file_name(format!("{}.tmp", defaults::LAST_SNAPSHOT));

    if tmp_symlink.symlink_metadata().is_ok() {
        fs::remove_file(&tmp_symlink)
            .with_context(|| format!("Could not remove '{}'", tmp_symlink.display()))?;
    }

    std::os::unix::fs::symlink(sid.sid(), &tmp_symlink)
        .with_context(|| format!("Could not create symlink '{}'", tmp_symlink.display()))?;
    fs::rename(&tmp_symlink, &symlink).with_context(|| {
        format!(
            "Could not rename '{}' to '{}'",
            tmp_symlink.display(),
            symlink.display()
        )
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use tempfile::tempdir;

    use super::*;

    fn test_cfg(root: &Path) -> Arc<Config> {
        let cfg = Config::new(root.join("config"));
        cfg.set_snapshots_path(&root.join("snapshots"));
        cfg.set_data_path(&root.join("data"));
        fs::create_dir_all(root.join("snapshots")).unwrap();
        Arc::new(cfg)
    }

    fn make_snapshots(cfg: &Arc<Config>, ids: &[&str]) -> Result<()> {
        for id in ids {
            Sid::new(id, cfg.clone())?.make_dirs()?;
        }
        Ok(())
    }

    const IDS: [&str; 4] = [
        "20151219-010324-123",
        "20151219-020324-123",
        "20151219-030324-123",
        "20151219-040324-123",
    ];

    #[test]
    fn test_list_valid() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = test_cfg(tmp.path());
        make_snapshots(&cfg, &IDS)?;

        let listed = list_snapshots(&cfg, false, true);
        assert_eq!(
            listed,
            [
                "20151219-040324-123",
                "20151219-030324-123",
                "20151219-020324-123",
                "20151219-010324-123",
            ]
        );

        Ok(())
    }

    #[test]
    fn test_list_new_snapshot() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = test_cfg(tmp.path());
        make_snapshots(&cfg, &IDS)?;
        Sid::new_snapshot(cfg.clone()).make_dirs()?;

        let listed = list_snapshots(&cfg, true, true);
        assert_eq!(listed.len(), 5);
        assert!(listed[0].is_new_snapshot());
        assert_eq!(listed[1], "20151219-040324-123");
        assert!(listed[4].is_real());

        // the New sentinel is not a snapshot; plain listing skips it
        let listed = list_snapshots(&cfg, false, true);
        assert_eq!(listed.len(), 4);

        Ok(())
    }

    #[test]
    fn test_list_snapshot_without_backup() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = test_cfg(tmp.path());
        make_snapshots(&cfg, &IDS)?;

        // a snapshot directory without a payload root is not valid
        fs::create_dir_all(cfg.snapshots_path().join("20151219-050324-123"))?;

        let listed = list_snapshots(&cfg, false, true);
        assert_eq!(listed.len(), 4);
        assert_eq!(listed[0], "20151219-040324-123");

        Ok(())
    }

    #[test]
    fn test_list_invalid_name() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = test_cfg(tmp.path());
        make_snapshots(&cfg, &IDS)?;

        fs::create_dir_all(
            cfg.snapshots_path()
                .join("20151219-000324-abc")
                .join(defaults::BACKUP_DIR),
        )?;

        let listed = list_snapshots(&cfg, false, true);
        assert_eq!(listed.len(), 4);

        Ok(())
    }

    #[test]
    fn test_list_ignores_last_snapshot_symlink() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = test_cfg(tmp.path());
        make_snapshots(&cfg, &IDS)?;

        std::os::unix::fs::symlink(
            "./20151219-040324-123",
            cfg.snapshots_path().join(defaults::LAST_SNAPSHOT),
        )?;

        let listed = list_snapshots(&cfg, false, true);
        assert_eq!(listed.len(), 4);

        Ok(())
    }

    #[test]
    fn test_list_not_reverse() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = test_cfg(tmp.path());
        make_snapshots(&cfg, &IDS)?;
        Sid::new_snapshot(cfg.clone()).make_dirs()?;

        let listed = list_snapshots(&cfg, true, false);
        assert_eq!(listed.len(), 5);
        assert_eq!(listed[0], "20151219-010324-123");
        assert!(listed[4].is_new_snapshot());

        Ok(())
    }

    #[test]
    fn test_iter_snapshots() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = test_cfg(tmp.path());
        make_snapshots(&cfg, &IDS)?;

        let mut count = 0;
        for sid in iter_snapshots(&cfg) {
            assert!(sid.is_real());
            count += 1;
        }
        assert_eq!(count, 4);

        Ok(())
    }

    #[test]
    fn test_last_snapshot() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = test_cfg(tmp.path());

        assert!(last_snapshot(&cfg).is_none());

        make_snapshots(&cfg, &IDS)?;
        let last = last_snapshot(&cfg).unwrap();
        assert_eq!(last, "20151219-040324-123");

        Ok(())
    }

    #[test]
    fn test_create_last_snapshot_symlink() -> Result<()> {
        let tmp = tempdir()?;
        let cfg = test_cfg(tmp.path());

        let sid1 = Sid::new("20151219-010324-123", cfg.clone())?;
        sid1.make_dirs()?;
        let symlink = cfg.last_snapshot_symlink();
        assert!(!symlink.exists());

        create_last_snapshot_symlink(&cfg, &sid1)?;
        assert!(symlink.is_symlink());
        assert_eq!(fs::canonicalize(&symlink)?, fs::canonicalize(sid1.path())?);

        let sid2 = Sid::new("20151219-020324-123", cfg.clone())?;
        sid2.make_dirs()?;
        create_last_snapshot_symlink(&cfg, &sid2)?;
        assert!(symlink.is_symlink());
        assert_eq!(fs::canonicalize(&symlink)?, fs::canonicalize(sid2.path())?);

        Ok(())
    }
}
