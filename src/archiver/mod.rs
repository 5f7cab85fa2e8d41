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

//! The take-snapshot pipeline.
//!
//! One [`Archiver`] drives one backup run end to end: it serializes
//! against other processes, prepares the working directory, spawns
//! rsync with hardlinking against the previous snapshot, classifies the
//! streamed output, captures permissions, and seals the working
//! directory into an immutable snapshot. Errors after a successful sync
//! are recorded via the failed marker rather than aborting; a partial
//! snapshot is more valuable than none.

pub mod flock;
pub mod permissions;
pub mod rsync;

use std::{
    ffi::OsStr,
    fs,
    io::{BufRead, BufReader, Read},
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    sync::Arc,
    thread,
};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use crossbeam_channel::Sender;

use crate::{
    config::{Config, ConfigFile, IncludeKind},
    global::defaults,
    repository::{self, fileinfo::FileInfo, sid::Sid},
    snapshotlog::SnapshotLog,
    ui, users, utils,
};

pub struct Archiver {
    cfg: Arc<Config>,
    log: SnapshotLog,
    flock: flock::GlobalFlock,
    /// Sticky flag: at least one permission restore failed in the last
    /// restore run.
    pub restore_permission_failed: bool,
}

impl Archiver {
    pub fn new(cfg: Arc<Config>) -> Self {
        let log = SnapshotLog::new(&cfg);
        Self {
            cfg,
            log,
            flock: flock::GlobalFlock::new(),
            restore_permission_failed: false,
        }
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.cfg
    }

    pub fn log(&mut self) -> &mut SnapshotLog {
        &mut self.log
    }

    /// Atomically overwrites the message file with
    /// `{severity}\n{message}` and mirrors the message into the log.
    pub fn set_take_snapshot_message(&mut self, severity: u8, message: &str) {
        let path = self.cfg.take_snapshot_message_file();
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let tmp_path = PathBuf::from(format!("{}.tmp", path.display()));
        let data = format!("{severity}\n{message}");
        if fs::write(&tmp_path, data).is_ok() {
            let _ = fs::rename(&tmp_path, &path);
        }

        let level = if severity == 1 { "[E]" } else { "[I]" };
        let _ = self.log.append(&format!("{level} {message}"));
    }

    /// Classifies one line of rsync output. `flags` is
    /// `[error_seen, change_seen]`.
    pub fn exec_rsync_callback(&mut self, line: &str, flags: &mut [bool; 2]) {
        if line.is_empty() {
            return;
        }

        self.set_take_snapshot_message(0, &format!("Take snapshot (rsync: {line})"));

        if line.starts_with("rsync:")
            && line.ends_with(')')
            && !line.starts_with("rsync: chgrp ")
            && !line.starts_with("rsync: chown ")
        {
            flags[0] = true;
            self.set_take_snapshot_message(1, &format!("Error: {line}"));
        }

        if let Some(code) = line.strip_prefix(defaults::OUT_FORMAT_PREFIX) {
            // directory metadata updates ('.d', 'cd') are not changes
            if !code.is_empty() && !code.starts_with('.') && !code.starts_with("cd") {
                flags[1] = true;
                let _ = self.log.append(&format!("[C] {code}"));
            }
        }
    }

    fn flock_exclusive(&mut self) -> Result<()> {
        if self.cfg.use_global_flock() {
            self.flock.acquire_exclusive()?;
        }
        Ok(())
    }

    fn flock_release(&mut self) {
        self.flock.release();
    }

    /// Runs one backup. Returns `(created, had_errors)`.
    pub fn take_snapshot(
        &mut self,
        sid: &Sid,
        now: NaiveDateTime,
        includes: &[(PathBuf, IncludeKind)],
    ) -> (bool, bool) {
        let mut flags = [false, false]; // [error_seen, change_seen]

        if let Err(e) = self.flock_exclusive() {
            ui::cli::error!("{e:#}");
            return (false, true);
        }

        let _ = self.log.new_run();
        self.set_take_snapshot_message(0, "Take snapshot");

        let result = self.run_snapshot(sid, now, includes, &mut flags);
        self.flock_release();

        match result {
            Ok(created) => (created, flags[0]),
            Err(e) => {
                self.set_take_snapshot_message(1, &format!("Error: {e:#}"));
                (false, true)
            }
        }
    }

    fn run_snapshot(
        &mut self,
        sid: &Sid,
        _now: NaiveDateTime,
        includes: &[(PathBuf, IncludeKind)],
        flags: &mut [bool; 2],
    ) -> Result<bool> {
        if sid.exists() {
            bail!("Snapshot '{}' already exists", sid.sid());
        }

        let new = Sid::new_snapshot(self.cfg.clone());

        // A leftover working directory can only be resumed if the
        // previous run armed the marker; otherwise start over.
        if new.exists() {
            if new.save_to_continue() {
                self.set_take_snapshot_message(0, "Found leftover working snapshot, resuming");
            } else {
                self.set_take_snapshot_message(0, "Found leftover working snapshot, discarding");
                utils::make_dirs_writable(&new.path())?;
                fs::remove_dir_all(new.path()).with_context(|| {
                    format!("Could not remove '{}'", new.path().display())
                })?;
            }
        }
        new.make_dirs()?;

        // verbatim copy of the configuration at snapshot time
        fs::copy(self.cfg.path(), new.path_to(defaults::CONFIG_FILE))
            .with_context(|| "Could not snapshot the configuration file")?;

        let previous = repository::last_snapshot(&self.cfg);

        let mut cmd = rsync::rsync_prefix(&self.cfg);
        if let Some(previous_sid) = &previous {
            cmd.push(format!(
                "--link-dest={}",
                previous_sid.backup_path().display()
            ));
        }
        cmd.extend(rsync::suffix_args(&self.cfg, includes, &self.cfg.exclude()));
        cmd.push(rsync::rsync_remote_path(
            &self.cfg,
            &new.backup_path(),
            rsync::REMOTE_MODES,
            "",
        ));

        // from here on an interrupted run can be resumed
        new.set_save_to_continue(true)?;

        let status = self.execute_rsync(&cmd, flags)?;
        match status.code() {
            Some(0) | Some(defaults::RSYNC_EXIT_VANISHED) => {}
            Some(code) => {
                flags[0] = true;
                self.set_take_snapshot_message(1, &format!("Error: rsync returned {code}"));
            }
            None => {
                flags[0] = true;
                self.set_take_snapshot_message(1, "Error: rsync was terminated by a signal");
            }
        }

        if flags[0] && !self.cfg.continue_on_errors() {
            // keep the working directory with the marker armed so the
            // next run picks it up
            return Ok(false);
        }

        if !flags[1] && !self.cfg.take_snapshot_regardless_of_changes() {
            self.set_take_snapshot_message(0, "Nothing changed, no new snapshot necessary");
            new.set_save_to_continue(false)?;
            fs::remove_dir_all(new.path())
                .with_context(|| format!("Could not remove '{}'", new.path().display()))?;
            return Ok(false);
        }

        // capture ownership and modes into the file-info store
        let mut file_info = FileInfo::new();
        let mut maps = permissions::IdMaps::default();
        if let Err(e) = permissions::save_permissions(&new, &mut file_info, &mut maps) {
            flags[0] = true;
            self.set_take_snapshot_message(1, &format!("Error: could not save permissions: {e:#}"));
        }
        if let Err(e) = file_info.save(&new.path_to(defaults::FILEINFO_FILE)) {
            flags[0] = true;
            self.set_take_snapshot_message(1, &format!("Error: could not save file info: {e:#}"));
        }

        if let Err(e) = self.save_snapshot_info(&new, sid, &maps) {
            flags[0] = true;
            self.set_take_snapshot_message(1, &format!("Error: could not save snapshot info: {e:#}"));
        }

        if flags[0] {
            new.set_failed(true)?;
        }

        // persist this run's log inside the snapshot
        if let Ok(raw) = self.log.raw() {
            let _ = new.set_log(&raw);
        }

        new.set_save_to_continue(false)?;

        // seal
        fs::rename(new.path(), sid.path()).with_context(|| {
            format!(
                "Could not rename '{}' to '{}'",
                new.path().display(),
                sid.path().display()
            )
        })?;

        if let Err(e) = repository::create_last_snapshot_symlink(&self.cfg, sid) {
            ui::cli::warning!("Could not update the last snapshot symlink: {e:#}");
        }

        Ok(true)
    }

    /// Spawns rsync and streams its output through the callback. Reader
    /// threads drain stdout and stderr so the child never stalls on a
    /// full pipe; lines reach the callback in arrival order.
    fn execute_rsync(&mut self, argv: &[String], flags: &mut [bool; 2]) -> Result<ExitStatus> {
        let _ = self.log.append(&format!("[I] {}", argv.join(" ")));

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Could not execute '{}'", argv[0]))?;

        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, tx.clone()));
        }
        drop(tx);

        for line in rx {
            self.exec_rsync_callback(&line, flags);
        }

        for reader in readers {
            let _ = reader.join();
        }

        child.wait().with_context(|| "Could not wait for rsync")
    }

    fn save_snapshot_info(
        &self,
        new: &Sid,
        sid: &Sid,
        maps: &permissions::IdMaps,
    ) -> Result<()> {
        let mut info = ConfigFile::new();
        info.set_str_value("snapshot_version", self.cfg.version());
        info.set_str_value("snapshot_date", sid.without_tag());
        info.set_str_value("snapshot_machine", &utils::hostname());
        info.set_str_value("snapshot_user", &users::current_user_name());
        info.set_int_value("snapshot_profile_id", self.cfg.profile_id());
        info.set_str_value("snapshot_tag", sid.tag());
        info.set_list_value("filesystem_mounts", &utils::filesystem_mount_points());

        for (i, (uid, name)) in maps.users.iter().enumerate() {
            info.set_int_value(&format!("user.{}.uid", i + 1), *uid as i64);
            info.set_str_value(&format!("user.{}.name", i + 1), name);
        }
        info.set_int_value("user.size", maps.users.len() as i64);

        for (i, (gid, name)) in maps.groups.iter().enumerate() {
            info.set_int_value(&format!("group.{}.gid", i + 1), *gid as i64);
            info.set_str_value(&format!("group.{}.name", i + 1), name);
        }
        info.set_int_value("group.size", maps.groups.len() as i64);

        new.set_info(&info)
    }

    /// Restores `path` from `sid` back to the live filesystem, or below
    /// `restore_to` when given, then reapplies the captured metadata.
    /// Per-decision messages go through `callback`.
    pub fn restore<F>(
        &mut self,
        sid: &Sid,
        path: &Path,
        restore_to: Option<&Path>,
        callback: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&str),
    {
        self.restore_permission_failed = false;

        let source = sid.backup_path_to(path);
        if !source.exists() {
            bail!(
                "'{}' does not exist in snapshot {}",
                path.display(),
                sid.sid()
            );
        }

        let target_root = restore_to.unwrap_or_else(|| Path::new("/"));
        let target = target_root.join(path.strip_prefix("/").unwrap_or(path));
        let target_parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| target_root.to_path_buf());
        fs::create_dir_all(&target_parent)
            .with_context(|| format!("Could not create '{}'", target_parent.display()))?;

        let status = Command::new("rsync")
            .args(["-rtDH", "--links"])
            .arg(&source)
            .arg(&target_parent)
            .status()
            .with_context(|| "Could not execute rsync")?;
        if !status.success() {
            bail!("rsync returned {status}");
        }

        // reapply captured metadata for every path below the restore
        // root, depth-first so directory modes are fixed after their
        // children
        let file_info = sid.file_info()?;
        let mut prefix = Vec::new();
        prefix.extend_from_slice(path.as_os_str().as_bytes());

        let keys: Vec<Vec<u8>> = file_info
            .iter()
            .map(|(key, _)| key.clone())
            .filter(|key| key.as_slice() == prefix || is_below(key, &prefix))
            .collect();

        for key in keys.iter().rev() {
            let relative = &key[1..];
            let live = target_root.join(Path::new(OsStr::from_bytes(relative)));
            if permissions::restore_path_info(key, live.as_os_str().as_bytes(), &file_info, callback)
            {
                self.restore_permission_failed = true;
            }
        }

        Ok(())
    }

    /// Deletes a sealed snapshot, restoring write bits first so that
    /// read-only payload directories do not block removal.
    pub fn remove_snapshot(&mut self, sid: &Sid) -> Result<()> {
        if !sid.is_real() {
            bail!("Only sealed snapshots can be removed");
        }

        utils::make_dirs_writable(&sid.path())?;
        fs::remove_dir_all(sid.path())
            .with_context(|| format!("Could not remove snapshot '{}'", sid.sid()))
    }

    /// Applies the retention policy: deletes everything
    /// [`repository::retention::smart_remove_list`] selects.
    pub fn smart_remove(
        &mut self,
        now: NaiveDateTime,
        keep_all: u32,
        keep_one_per_day: u32,
        keep_one_per_week: u32,
        keep_one_per_month: u32,
    ) -> Result<Vec<Sid>> {
        let delete = repository::retention::smart_remove_list(
            &self.cfg,
            now,
            keep_all,
            keep_one_per_day,
            keep_one_per_week,
            keep_one_per_month,
        );

        for sid in &delete {
            ui::cli::log!("Removing snapshot {}", sid.display_id());
            self.remove_snapshot(sid)?;
        }

        Ok(delete)
    }
}

fn is_below(key: &[u8], prefix: &[u8]) -> bool {
    key.len() > prefix.len() && key.starts_with(prefix) && key[prefix.len()] == b'/'
}

fn spawn_line_reader<R>(pipe: R, tx: Sender<String>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.split(b'\n') {
            let Ok(bytes) = line else {
                break;
            };
            let text = String::from_utf8_lossy(&bytes).into_owned();
            if tx.send(text).is_err() {
                break;
            }
        }
    })
}
