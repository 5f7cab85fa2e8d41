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

//! rsync argument construction.
//!
//! This module only *builds* argument vectors; process execution lives
//! in the archiver. Every function here is pure and unit-testable
//! without spawning anything.
//!
//! The anchored include scheme works in three layers: ancestor
//! directories are included non-recursively (list 1), then the user
//! excludes, then the actual payload patterns (list 2), and finally
//! `--exclude=*` drops everything that no include matched. Without the
//! terminal `--exclude=*` rsync would copy the whole source root.

use std::{path::Path, sync::Arc};

use crate::{
    config::{Config, IncludeKind},
    global::defaults,
};

/// Modes in which the repository lives behind a remote shell.
pub const REMOTE_MODES: &[&str] = &["ssh"];

fn unique(args: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if !out.contains(&arg) {
            out.push(arg);
        }
    }
    out
}

/// `--exclude=<pattern>` for every pattern, first occurrence wins.
pub fn exclude_args<I, S>(patterns: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    unique(
        patterns
            .into_iter()
            .map(|pattern| format!("--exclude={}", pattern.as_ref()))
            .collect(),
    )
}

/// Builds the two `--include=` lists for the given include entries.
///
/// List 1 anchors the ancestor chain: for every entry all ancestors up
/// to but not including `/`, plus the entry itself for directory-tree
/// entries. List 2 carries the payload patterns: `<path>/**` for
/// directory trees, the bare path for single items. The root `/`
/// contributes `--include=/` and `--include=/**` to list 2 only.
pub fn include_args(includes: &[(std::path::PathBuf, IncludeKind)]) -> (Vec<String>, Vec<String>) {
    let mut items1 = Vec::new();
    let mut items2 = Vec::new();

    for (path, kind) in includes {
        if path.as_path() == Path::new("/") {
            items2.push(String::from("--include=/"));
            items2.push(String::from("--include=/**"));
            continue;
        }

        let mut folder = path.as_path();
        match kind {
            IncludeKind::Directory => {
                items2.push(format!("--include={}/**", folder.display()));
            }
            IncludeKind::Single => {
                items2.push(format!("--include={}", folder.display()));
                folder = folder.parent().unwrap_or(Path::new("/"));
            }
        }

        while folder != Path::new("/") && !folder.as_os_str().is_empty() {
            items1.push(format!("--include={}/", folder.display()));
            folder = folder.parent().unwrap_or(Path::new("/"));
        }
    }

    (unique(items1), unique(items2))
}

/// The full argument tail: `--chmod=Du+wx`, the repository-protection
/// excludes, include list 1, the user excludes, include list 2,
/// `--exclude=*` and the source root.
pub fn suffix_args(
    cfg: &Arc<Config>,
    includes: &[(std::path::PathBuf, IncludeKind)],
    excludes: &[String],
) -> Vec<String> {
    let mut suffix = vec![String::from("--chmod=Du+wx")];

    // never back up the repository, the application state or the mount
    // root into a snapshot
    suffix.extend(exclude_args([
        cfg.snapshots_path().to_string_lossy().into_owned(),
        cfg.data_path().to_string_lossy().into_owned(),
        cfg.mount_root().to_string_lossy().into_owned(),
    ]));

    let (items1, items2) = include_args(includes);
    suffix.extend(items1);
    suffix.extend(exclude_args(excludes));
    suffix.extend(items2);

    suffix.push(String::from("--exclude=*"));
    suffix.push(String::from("/"));
    suffix
}

/// Prefixes `path` with `user@host:` when the snapshot mode is one of
/// `use_mode`, quoting the path portion with `quote` on both sides.
pub fn rsync_remote_path(cfg: &Arc<Config>, path: &Path, use_mode: &[&str], quote: &str) -> String {
    let path = path.to_string_lossy();
    let mode = cfg.snapshots_mode();

    if REMOTE_MODES.contains(&mode.as_str()) && use_mode.contains(&mode.as_str()) {
        format!(
            "{}@{}:{}{}{}",
            cfg.ssh_user(),
            cfg.ssh_host(),
            quote,
            path,
            quote
        )
    } else {
        format!("{quote}{path}{quote}")
    }
}

/// The leading rsync argv: binary name, base options and the itemized
/// out-format the callback protocol parses.
pub fn rsync_prefix(_cfg: &Arc<Config>) -> Vec<String> {
    let mut cmd = vec![String::from("rsync")];
    cmd.extend(defaults::RSYNC_BASE_OPTIONS.iter().map(|s| s.to_string()));
    cmd.push(String::from("-i"));
    cmd.push(format!(
        "--out-format={}%i %n%L",
        defaults::OUT_FORMAT_PREFIX
    ));
    cmd
}
