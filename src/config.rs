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

//! Keyed configuration store.
//!
//! [`ConfigFile`] is a plain `key=value` text store. It backs both the
//! main configuration and the per-snapshot `info` file. [`Config`] wraps
//! a `ConfigFile` with typed accessors for the options the snapshot
//! engine consumes, scoped to the active profile.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use rand::Rng;

use crate::{global::defaults, users};

/// How an include entry is synced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeKind {
    /// The whole directory tree below the path.
    Directory,
    /// The single file or directory itself.
    Single,
}

impl IncludeKind {
    pub fn from_int(value: i64) -> Self {
        if value == 1 {
            IncludeKind::Single
        } else {
            IncludeKind::Directory
        }
    }

    pub fn as_int(self) -> i64 {
        match self {
            IncludeKind::Directory => 0,
            IncludeKind::Single => 1,
        }
    }
}

/// A sorted `key=value` text store. Loading is lenient: lines without a
/// `=` separator are skipped, a missing file yields an empty store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    dict: BTreeMap<String, String>,
}

impl ConfigFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Self {
        let mut config = Self::new();
        let Ok(content) = fs::read_to_string(path) else {
            return config;
        };

        for line in content.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            config.dict.insert(key.to_string(), value.to_string());
        }

        config
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut content = String::new();
        for (key, value) in &self.dict {
            content.push_str(key);
            content.push('=');
            content.push_str(value);
            content.push('\n');
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create '{}'", parent.display()))?;
        }
        fs::write(path, content)
            .with_context(|| format!("Could not write '{}'", path.display()))
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }

    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.dict.get(key).map(String::as_str)
    }

    pub fn str_value_or(&self, key: &str, default: &str) -> String {
        self.str_value(key).unwrap_or(default).to_string()
    }

    pub fn set_str_value(&mut self, key: &str, value: &str) {
        self.dict.insert(key.to_string(), value.to_string());
    }

    pub fn int_value_or(&self, key: &str, default: i64) -> i64 {
        self.str_value(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn set_int_value(&mut self, key: &str, value: i64) {
        self.set_str_value(key, &value.to_string());
    }

    pub fn bool_value_or(&self, key: &str, default: bool) -> bool {
        match self.str_value(key) {
            Some(v) => matches!(v, "true" | "1"),
            None => default,
        }
    }

    pub fn set_bool_value(&mut self, key: &str, value: bool) {
        self.set_str_value(key, if value { "true" } else { "false" });
    }

    /// Stores a list as `key.size` plus `key.<n>.value` entries,
    /// replacing any previous list under the same key.
    pub fn set_list_value(&mut self, key: &str, values: &[String]) {
        let old_size = self.int_value_or(&format!("{key}.size"), 0);
        for i in 1..=old_size {
            self.dict.remove(&format!("{key}.{i}.value"));
        }

        for (i, value) in values.iter().enumerate() {
            self.set_str_value(&format!("{key}.{}.value", i + 1), value);
        }
        self.set_int_value(&format!("{key}.size"), values.len() as i64);
    }

    pub fn list_value(&self, key: &str) -> Vec<String> {
        let size = self.int_value_or(&format!("{key}.size"), 0);
        (1..=size)
            .filter_map(|i| self.str_value(&format!("{key}.{i}.value")))
            .map(str::to_string)
            .collect()
    }

    pub fn remove_key(&mut self, key: &str) {
        self.dict.remove(key);
    }
}

/// The active configuration. Shared across the engine as `Arc<Config>`;
/// snapshot identifiers keep a handle to it for path and tag
/// computation but never outlive the run that created them.
#[derive(Debug)]
pub struct Config {
    path: PathBuf,
    file: RwLock<ConfigFile>,
}

impl Config {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let file = RwLock::new(ConfigFile::load(&path));
        Self { path, file }
    }

    /// Path of the backing configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self) -> Result<()> {
        self.file.read().save(&self.path)
    }

    pub fn version(&self) -> &'static str {
        defaults::VERSION
    }

    pub fn profile_id(&self) -> i64 {
        self.file.read().int_value_or("global.current_profile", 1)
    }

    fn profile_key(&self, name: &str) -> String {
        format!("profile{}.{}", self.profile_id(), name)
    }

    // The profile key is always computed before a lock is taken; the
    // lock is not reentrant.

    fn profile_str(&self, name: &str, default: &str) -> String {
        let key = self.profile_key(name);
        self.file.read().str_value_or(&key, default)
    }

    fn set_profile_str(&self, name: &str, value: &str) {
        let key = self.profile_key(name);
        self.file.write().set_str_value(&key, value);
    }

    fn profile_bool(&self, name: &str, default: bool) -> bool {
        let key = self.profile_key(name);
        self.file.read().bool_value_or(&key, default)
    }

    fn set_profile_bool(&self, name: &str, value: bool) {
        let key = self.profile_key(name);
        self.file.write().set_bool_value(&key, value);
    }

    // -- Repository --

    pub fn snapshots_path(&self) -> PathBuf {
        PathBuf::from(self.profile_str("snapshots.path", ""))
    }

    pub fn set_snapshots_path(&self, path: &Path) {
        self.set_profile_str("snapshots.path", &path.to_string_lossy());
    }

    pub fn last_snapshot_symlink(&self) -> PathBuf {
        self.snapshots_path().join(defaults::LAST_SNAPSHOT)
    }

    // -- Snapshot mode --

    pub fn snapshots_mode(&self) -> String {
        self.profile_str("snapshots.mode", "local")
    }

    pub fn set_snapshots_mode(&self, mode: &str) {
        self.set_profile_str("snapshots.mode", mode);
    }

    pub fn ssh_host(&self) -> String {
        self.profile_str("snapshots.ssh.host", "")
    }

    pub fn set_ssh_host(&self, host: &str) {
        self.set_profile_str("snapshots.ssh.host", host);
    }

    pub fn ssh_user(&self) -> String {
        let default = users::current_user_name();
        self.profile_str("snapshots.ssh.user", &default)
    }

    pub fn set_ssh_user(&self, user: &str) {
        self.set_profile_str("snapshots.ssh.user", user);
    }

    // -- Include/exclude lists --

    pub fn include(&self) -> Vec<(PathBuf, IncludeKind)> {
        let key = self.profile_key("snapshots.include");
        let file = self.file.read();
        let size = file.int_value_or(&format!("{key}.size"), 0);

        (1..=size)
            .filter_map(|i| {
                let value = file.str_value(&format!("{key}.{i}.value"))?;
                let kind = file.int_value_or(&format!("{key}.{i}.type"), 0);
                Some((PathBuf::from(value), IncludeKind::from_int(kind)))
            })
            .collect()
    }

    pub fn set_include(&self, includes: &[(PathBuf, IncludeKind)]) {
        let key = self.profile_key("snapshots.include");
        let mut file = self.file.write();

        let old_size = file.int_value_or(&format!("{key}.size"), 0);
        for i in 1..=old_size {
            file.remove_key(&format!("{key}.{i}.value"));
            file.remove_key(&format!("{key}.{i}.type"));
        }

        for (i, (path, kind)) in includes.iter().enumerate() {
            file.set_str_value(&format!("{key}.{}.value", i + 1), &path.to_string_lossy());
            file.set_int_value(&format!("{key}.{}.type", i + 1), kind.as_int());
        }
        file.set_int_value(&format!("{key}.size"), includes.len() as i64);
    }

    pub fn exclude(&self) -> Vec<String> {
        let key = self.profile_key("snapshots.exclude");
        self.file.read().list_value(&key)
    }

    pub fn set_exclude(&self, patterns: &[&str]) {
        let key = self.profile_key("snapshots.exclude");
        let values: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        self.file.write().set_list_value(&key, &values);
    }

    // -- Behavior switches --

    pub fn continue_on_errors(&self) -> bool {
        self.profile_bool("snapshots.continue_on_errors", true)
    }

    pub fn set_continue_on_errors(&self, value: bool) {
        self.set_profile_bool("snapshots.continue_on_errors", value);
    }

    pub fn take_snapshot_regardless_of_changes(&self) -> bool {
        self.profile_bool("snapshots.take_snapshot_regardless_of_changes", false)
    }

    pub fn set_take_snapshot_regardless_of_changes(&self, value: bool) {
        self.set_profile_bool("snapshots.take_snapshot_regardless_of_changes", value);
    }

    pub fn use_global_flock(&self) -> bool {
        self.file.read().bool_value_or("global.use_flock", false)
    }

    pub fn set_use_global_flock(&self, value: bool) {
        self.file.write().set_bool_value("global.use_flock", value);
    }

    // -- Profile tag --

    /// The three-digit tag appended to snapshot identifiers. Generated
    /// once and then kept stable in the key store.
    pub fn tag(&self) -> String {
        let key = self.profile_key("snapshots.tag");
        if let Some(tag) = self.file.read().str_value(&key) {
            return tag.to_string();
        }

        let tag = rand::rng().random_range(100..=999).to_string();
        self.file.write().set_str_value(&key, &tag);
        tag
    }

    pub fn set_tag(&self, tag: &str) {
        self.set_profile_str("snapshots.tag", tag);
    }

    // -- Retention policy --

    fn keep_value(&self, name: &str, default: u32) -> u32 {
        let key = self.profile_key(name);
        self.file
            .read()
            .int_value_or(&key, default as i64)
            .max(0) as u32
    }

    pub fn keep_all(&self) -> u32 {
        self.keep_value("snapshots.smart_remove.keep_all", defaults::DEFAULT_KEEP_ALL)
    }

    pub fn keep_one_per_day(&self) -> u32 {
        self.keep_value(
            "snapshots.smart_remove.keep_one_per_day",
            defaults::DEFAULT_KEEP_ONE_PER_DAY,
        )
    }

    pub fn keep_one_per_week(&self) -> u32 {
        self.keep_value(
            "snapshots.smart_remove.keep_one_per_week",
            defaults::DEFAULT_KEEP_ONE_PER_WEEK,
        )
    }

    pub fn keep_one_per_month(&self) -> u32 {
        self.keep_value(
            "snapshots.smart_remove.keep_one_per_month",
            defaults::DEFAULT_KEEP_ONE_PER_MONTH,
        )
    }

    // -- Application paths --

    /// Application state directory. Holds the per-run message and log
    /// files and the mount root.
    pub fn data_path(&self) -> PathBuf {
        if let Some(path) = self.file.read().str_value("global.data.path") {
            return PathBuf::from(path);
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("coati")
    }

    pub fn set_data_path(&self, path: &Path) {
        self.file
            .write()
            .set_str_value("global.data.path", &path.to_string_lossy());
    }

    pub fn mount_root(&self) -> PathBuf {
        self.data_path().join("mnt")
    }

    pub fn take_snapshot_message_file(&self) -> PathBuf {
        self.data_path()
            .join(format!("worker{}.message", self.profile_id()))
    }

    pub fn take_snapshot_log_file(&self) -> PathBuf {
        self.data_path()
            .join(format!("worker{}.log", self.profile_id()))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_config_file_roundtrip() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("config");

        let mut config = ConfigFile::new();
        config.set_str_value("foo", "bar");
        config.set_int_value("answer", 42);
        config.set_bool_value("flag", true);
        config.save(&path)?;

        assert_eq!(fs::read_to_string(&path)?, "answer=42\nflag=true\nfoo=bar\n");

        let loaded = ConfigFile::load(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.str_value_or("foo", "default"), "bar");
        assert_eq!(loaded.int_value_or("answer", 0), 42);
        assert!(loaded.bool_value_or("flag", false));

        Ok(())
    }

    #[test]
    fn test_config_file_skips_malformed_lines() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("config");
        fs::write(&path, "foo=bar\nthis line is broken\n=nokey\nbaz=qux\n")?;

        let config = ConfigFile::load(&path);
        assert_eq!(config.str_value("foo"), Some("bar"));
        assert_eq!(config.str_value("baz"), Some("qux"));
        assert_eq!(config.str_value("this line is broken"), None);

        Ok(())
    }

    #[test]
    fn test_config_file_list_value() {
        let mut config = ConfigFile::new();
        config.set_list_value("mounts", &["/".to_string(), "/home".to_string()]);
        assert_eq!(config.list_value("mounts"), vec!["/", "/home"]);

        config.set_list_value("mounts", &["/".to_string()]);
        assert_eq!(config.list_value("mounts"), vec!["/"]);
        assert_eq!(config.str_value("mounts.2.value"), None);
    }

    #[test]
    fn test_missing_file_yields_empty_config() {
        let config = ConfigFile::load(Path::new("/nonexistent/coati/config"));
        assert!(config.is_empty());
    }

    #[test]
    fn test_include_exclude() -> Result<()> {
        let tmp = tempdir()?;
        let config = Config::new(tmp.path().join("config"));

        config.set_include(&[
            (PathBuf::from("/foo"), IncludeKind::Directory),
            (PathBuf::from("/bar/baz"), IncludeKind::Single),
        ]);
        assert_eq!(
            config.include(),
            vec![
                (PathBuf::from("/foo"), IncludeKind::Directory),
                (PathBuf::from("/bar/baz"), IncludeKind::Single),
            ]
        );

        config.set_exclude(&["/foo/bar", "*blub"]);
        assert_eq!(config.exclude(), vec!["/foo/bar", "*blub"]);

        Ok(())
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let tmp = tempdir()?;
        let config = Config::new(tmp.path().join("config"));

        assert_eq!(config.profile_id(), 1);
        assert_eq!(config.snapshots_mode(), "local");
        assert!(config.continue_on_errors());
        assert!(!config.take_snapshot_regardless_of_changes());
        assert!(!config.use_global_flock());

        Ok(())
    }

    #[test]
    fn test_tag_is_stable() -> Result<()> {
        let tmp = tempdir()?;
        let config = Config::new(tmp.path().join("config"));

        let tag = config.tag();
        assert_eq!(tag.len(), 3);
        assert_eq!(config.tag(), tag);

        config.set_tag("123");
        assert_eq!(config.tag(), "123");

        Ok(())
    }

    #[test]
    fn test_save_and_reload() -> Result<()> {
        let tmp = tempdir()?;
        let path = tmp.path().join("config");

        let config = Config::new(&path);
        config.set_snapshots_path(&tmp.path().join("snapshots"));
        config.set_snapshots_mode("ssh");
        config.set_ssh_host("localhost");
        config.set_ssh_user("foo");
        config.save()?;

        let reloaded = Config::new(&path);
        assert_eq!(reloaded.snapshots_path(), tmp.path().join("snapshots"));
        assert_eq!(reloaded.snapshots_mode(), "ssh");
        assert_eq!(reloaded.ssh_host(), "localhost");
        assert_eq!(reloaded.ssh_user(), "foo");

        Ok(())
    }
}
