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

//! Snapshot identifiers.
//!
//! A snapshot is identified by a canonical `YYYYMMDD-HHMMSS[-NNN]`
//! string, where `NNN` is the three-digit profile tag. Two sentinels
//! share the same interface: [`Sid::root`] stands for the live
//! filesystem ("Now") and sorts above every real snapshot;
//! [`Sid::new_snapshot`] is the in-progress working directory and sorts
//! above Root. A snapshot identifier is a pure value; the directory it
//! points to may or may not exist.

use std::{
    cmp::Ordering,
    fmt,
    fs,
    hash::{Hash, Hasher},
    io::{Read, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use anyhow::{Context, Result};
use bzip2::{Compression, read::BzDecoder, write::BzEncoder};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use thiserror::Error;

use crate::{
    config::{Config, ConfigFile},
    global::defaults,
    repository::fileinfo::FileInfo,
    snapshotlog::{self, LogFilter},
};

pub static SID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}-\d{6}(-\d{3})?$").unwrap());

#[derive(Debug, Error)]
pub enum SidError {
    #[error("invalid snapshot ID '{0}'")]
    InvalidSnapshotId(String),
}

/// Ordering relies on the variant order: real snapshots compare by
/// canonical string, Root is above every real snapshot, New above Root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Kind {
    Real(String),
    Root,
    New,
}

#[derive(Clone)]
pub struct Sid {
    kind: Kind,
    cfg: Arc<Config>,
}

impl Sid {
    /// Builds a snapshot identifier from its canonical string.
    pub fn new(sid: &str, cfg: Arc<Config>) -> Result<Self, SidError> {
        if !SID_REGEX.is_match(sid) {
            return Err(SidError::InvalidSnapshotId(sid.to_string()));
        }

        Ok(Self {
            kind: Kind::Real(sid.to_string()),
            cfg,
        })
    }

    /// Builds a snapshot identifier for a timestamp, tagged with the
    /// current profile tag.
    pub fn from_datetime(timestamp: NaiveDateTime, cfg: Arc<Config>) -> Self {
        let id = format!("{}-{}", timestamp.format("%Y%m%d-%H%M%S"), cfg.tag());
        Self {
            kind: Kind::Real(id),
            cfg,
        }
    }

    /// Builds a snapshot identifier for a date, at midnight.
    pub fn from_date(date: NaiveDate, cfg: Arc<Config>) -> Self {
        Self::from_datetime(date.and_hms_opt(0, 0, 0).unwrap(), cfg)
    }

    /// The Root sentinel: the live filesystem, "Now".
    pub fn root(cfg: Arc<Config>) -> Self {
        Self {
            kind: Kind::Root,
            cfg,
        }
    }

    /// The New sentinel: the in-progress working directory.
    pub fn new_snapshot(cfg: Arc<Config>) -> Self {
        Self {
            kind: Kind::New,
            cfg,
        }
    }

    pub fn is_real(&self) -> bool {
        matches!(self.kind, Kind::Real(_))
    }

    pub fn is_root(&self) -> bool {
        self.kind == Kind::Root
    }

    pub fn is_new_snapshot(&self) -> bool {
        self.kind == Kind::New
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.cfg
    }

    /// The canonical string.
    pub fn sid(&self) -> &str {
        match &self.kind {
            Kind::Real(id) => id,
            Kind::Root => "/",
            Kind::New => defaults::NEW_SNAPSHOT,
        }
    }

    /// The canonical string without the profile tag.
    pub fn without_tag(&self) -> &str {
        match &self.kind {
            Kind::Real(id) => &id[..15],
            _ => self.sid(),
        }
    }

    /// The profile tag, or an empty string for tagless identifiers and
    /// sentinels.
    pub fn tag(&self) -> &str {
        match &self.kind {
            Kind::Real(id) if id.len() == 19 => &id[16..],
            _ => "",
        }
    }

    /// The six integer date/time components.
    pub fn split(&self) -> Option<(i32, u32, u32, u32, u32, u32)> {
        let Kind::Real(id) = &self.kind else {
            return None;
        };

        Some((
            id[0..4].parse().ok()?,
            id[4..6].parse().ok()?,
            id[6..8].parse().ok()?,
            id[9..11].parse().ok()?,
            id[11..13].parse().ok()?,
            id[13..15].parse().ok()?,
        ))
    }

    pub fn datetime(&self) -> Option<NaiveDateTime> {
        let (year, month, day, hour, minute, second) = self.split()?;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }

    pub fn date(&self) -> Option<NaiveDate> {
        self.datetime().map(|dt| dt.date())
    }

    /// Human-readable identifier, `YYYY-MM-DD HH:MM:SS`.
    pub fn display_id(&self) -> String {
        match &self.kind {
            Kind::Real(id) => format!(
                "{}-{}-{} {}:{}:{}",
                &id[0..4],
                &id[4..6],
                &id[6..8],
                &id[9..11],
                &id[11..13],
                &id[13..15]
            ),
            Kind::Root => String::from("Now"),
            Kind::New => String::from(defaults::NEW_SNAPSHOT),
        }
    }

    /// Display identifier plus the user-given name and a failure mark.
    pub fn display_name(&self) -> String {
        let mut ret = self.display_id();

        let name = self.name();
        if !name.is_empty() {
            ret.push_str(" - ");
            ret.push_str(&name);
        }

        if self.failed() {
            ret.push_str(" (failed)");
        }

        ret
    }

    // -- Path resolution --

    fn strip_root(path: &Path) -> &Path {
        path.strip_prefix("/").unwrap_or(path)
    }

    /// The snapshot directory. Root resolves to `/`.
    pub fn path(&self) -> PathBuf {
        match &self.kind {
            Kind::Root => PathBuf::from("/"),
            _ => self.cfg.snapshots_path().join(self.sid()),
        }
    }

    /// A path below the snapshot directory.
    pub fn path_to<P: AsRef<Path>>(&self, sub: P) -> PathBuf {
        self.path().join(Self::strip_root(sub.as_ref()))
    }

    /// The payload root. Root resolves to `/`.
    pub fn backup_path(&self) -> PathBuf {
        match &self.kind {
            Kind::Root => PathBuf::from("/"),
            _ => self.path().join(defaults::BACKUP_DIR),
        }
    }

    /// Where an absolute source path lives inside the payload tree.
    pub fn backup_path_to<P: AsRef<Path>>(&self, sub: P) -> PathBuf {
        self.backup_path().join(Self::strip_root(sub.as_ref()))
    }

    /// Creates the payload root, optionally extended with a subpath.
    /// Idempotent.
    pub fn make_dirs(&self) -> Result<()> {
        let path = self.backup_path();
        fs::create_dir_all(&path)
            .with_context(|| format!("Could not create '{}'", path.display()))
    }

    pub fn make_dirs_to<P: AsRef<Path>>(&self, sub: P) -> Result<()> {
        let path = self.backup_path_to(sub);
        fs::create_dir_all(&path)
            .with_context(|| format!("Could not create '{}'", path.display()))
    }

    /// A snapshot directory is valid only if its payload root exists.
    pub fn exists(&self) -> bool {
        self.backup_path().is_dir()
    }

    /// True if `path` can be opened inside this snapshot. Symlinks are
    /// followed, but only targets inside the payload tree count.
    pub fn can_open_path<P: AsRef<Path>>(&self, path: P) -> bool {
        let full = self.backup_path_to(path);
        if !full.exists() {
            return false;
        }

        let (Ok(real), Ok(root)) = (fs::canonicalize(&full), fs::canonicalize(self.backup_path()))
        else {
            return false;
        };
        real.starts_with(root)
    }

    // -- Auxiliary files --

    /// The user-given display name, or an empty string.
    pub fn name(&self) -> String {
        fs::read_to_string(self.path_to(defaults::NAME_FILE)).unwrap_or_default()
    }

    pub fn set_name(&self, name: &str) -> Result<()> {
        let path = self.path_to(defaults::NAME_FILE);
        fs::write(&path, name).with_context(|| format!("Could not write '{}'", path.display()))
    }

    pub fn failed(&self) -> bool {
        self.path_to(defaults::FAILED_MARKER).exists()
    }

    pub fn set_failed(&self, failed: bool) -> Result<()> {
        let path = self.path_to(defaults::FAILED_MARKER);
        if failed {
            fs::write(&path, b"").with_context(|| format!("Could not write '{}'", path.display()))
        } else if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Could not remove '{}'", path.display()))
        } else {
            Ok(())
        }
    }

    /// Resume marker. Only meaningful on the New sentinel.
    pub fn save_to_continue(&self) -> bool {
        self.path_to(defaults::SAVE_TO_CONTINUE_MARKER).exists()
    }

    pub fn set_save_to_continue(&self, value: bool) -> Result<()> {
        let path = self.path_to(defaults::SAVE_TO_CONTINUE_MARKER);
        if value {
            fs::write(&path, b"").with_context(|| format!("Could not write '{}'", path.display()))
        } else if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Could not remove '{}'", path.display()))
        } else {
            Ok(())
        }
    }

    /// The `info` key=value document. Missing file yields an empty one.
    pub fn info(&self) -> ConfigFile {
        ConfigFile::load(&self.path_to(defaults::INFO_FILE))
    }

    pub fn set_info(&self, info: &ConfigFile) -> Result<()> {
        info.save(&self.path_to(defaults::INFO_FILE))
    }

    pub fn file_info(&self) -> Result<FileInfo> {
        FileInfo::load(&self.path_to(defaults::FILEINFO_FILE))
    }

    pub fn set_file_info(&self, file_info: &FileInfo) -> Result<()> {
        file_info.save(&self.path_to(defaults::FILEINFO_FILE))
    }

    /// The compressed per-run log, filtered.
    pub fn log(&self, filter: LogFilter) -> Result<String> {
        let path = self.path_to(defaults::TAKE_SNAPSHOT_LOG_FILE);
        let file = fs::File::open(&path)
            .with_context(|| format!("Failed to get snapshot log from '{}'", path.display()))?;

        let mut decoder = BzDecoder::new(file);
        let mut data = Vec::new();
        decoder
            .read_to_end(&mut data)
            .with_context(|| format!("Failed to get snapshot log from '{}'", path.display()))?;

        let content = String::from_utf8_lossy(&data).into_owned();
        Ok(snapshotlog::filter_lines(&content, filter))
    }

    pub fn set_log(&self, content: &[u8]) -> Result<()> {
        let path = self.path_to(defaults::TAKE_SNAPSHOT_LOG_FILE);
        let file = fs::File::create(&path)
            .with_context(|| format!("Could not create '{}'", path.display()))?;

        let mut encoder = BzEncoder::new(file, Compression::best());
        encoder.write_all(content)?;
        encoder
            .finish()
            .with_context(|| format!("Could not write '{}'", path.display()))?;
        Ok(())
    }

    /// Sealed snapshots are read-only; this flips the user write bit on
    /// the snapshot directory for explicit mutation.
    pub fn make_writable(&self) -> Result<()> {
        let path = self.path();
        let meta = fs::metadata(&path)
            .with_context(|| format!("Could not stat '{}'", path.display()))?;

        let mut permissions = meta.permissions();
        permissions.set_mode(permissions.mode() | 0o200);
        fs::set_permissions(&path, permissions)
            .with_context(|| format!("Could not make '{}' writable", path.display()))
    }
}

impl PartialEq for Sid {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Sid {}

impl PartialEq<&str> for Sid {
    fn eq(&self, other: &&str) -> bool {
        self.sid() == *other
    }
}

impl PartialOrd for Sid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sid {
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind.cmp(&other.kind)
    }
}

impl Hash for Sid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sid())
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sid({})", self.sid())
    }
}
