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

//! The process-global advisory lock.
//!
//! Serializes backup runs across processes. Acquisition blocks without
//! timeout; contention means waiting, not failure. The lock file lives
//! at a fixed per-user path and is made world read/writable so that
//! runs under different users can share it. The file persists after
//! release for reuse.

use std::{
    fs::{File, OpenOptions, Permissions},
    os::unix::fs::PermissionsExt,
    os::unix::io::AsRawFd,
    path::PathBuf,
};

use anyhow::{Context, Result, bail};

use crate::users;

/// Fixed path of the lock file.
pub fn lock_path() -> PathBuf {
    PathBuf::from(format!("/tmp/coati-{}.lock", users::current_uid()))
}

#[derive(Default)]
pub struct GlobalFlock {
    file: Option<File>,
}

impl GlobalFlock {
    pub const fn new() -> Self {
        Self { file: None }
    }

    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }

    /// Blocks until the exclusive lock is granted.
    pub fn acquire_exclusive(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        let path = lock_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Could not open lock file '{}'", path.display()))?;

        // The chmod may fail if another user owns the lock file. The
        // lock itself still works in that case.
        let _ = std::fs::set_permissions(&path, Permissions::from_mode(0o666));

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            bail!(
                "Could not lock '{}': {}",
                path.display(),
                std::io::Error::last_os_error()
            );
        }

        self.file = Some(file);
        Ok(())
    }

    /// Drops the advisory lock. The lock file is kept for reuse.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

impl Drop for GlobalFlock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_flock_exclusive() -> Result<()> {
        let mut flock = GlobalFlock::new();
        flock.acquire_exclusive()?;
        assert!(flock.is_locked());

        let path = lock_path();
        assert!(path.exists());
        let mode = std::fs::metadata(&path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o666);

        // a second acquirer blocks until the first releases
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            let mut second = GlobalFlock::new();
            second.acquire_exclusive().unwrap();
            second.release();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        flock.release();
        assert!(rx.recv_timeout(Duration::from_secs(10)).is_ok());
        handle.join().unwrap();

        assert!(!flock.is_locked());
        assert!(path.exists());

        Ok(())
    }
}
