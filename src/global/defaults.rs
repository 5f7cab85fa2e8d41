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

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// -- Repository layout --
/// Reserved directory name for the in-progress working snapshot.
pub const NEW_SNAPSHOT: &str = "new_snapshot";
/// Symlink in the repository root pointing at the most recent snapshot.
pub const LAST_SNAPSHOT: &str = "last_snapshot";
/// Payload subdirectory inside every snapshot. A snapshot directory
/// without it is not a valid snapshot.
pub const BACKUP_DIR: &str = "backup";

// -- Auxiliary files inside a snapshot directory --
pub const CONFIG_FILE: &str = "config";
pub const INFO_FILE: &str = "info";
pub const FILEINFO_FILE: &str = "fileinfo.bz2";
pub const TAKE_SNAPSHOT_LOG_FILE: &str = "takesnapshot.log.bz2";
pub const NAME_FILE: &str = "name";
pub const FAILED_MARKER: &str = "failed";
/// Marker on the working snapshot only. Its presence allows the next
/// run to resume the working directory instead of discarding it.
pub const SAVE_TO_CONTINUE_MARKER: &str = "save_to_continue";

// -- rsync --
/// Itemized-changes sentinel injected via `--out-format`. The
/// take-snapshot callback parses exactly this prefix, so it is kept
/// stable for compatibility with existing log consumers.
pub const OUT_FORMAT_PREFIX: &str = "BACKINTIME: ";

/// Base rsync options. Ownership and permissions are intentionally not
/// carried by rsync; they are captured out-of-band into the file-info
/// store and reapplied on restore.
pub const RSYNC_BASE_OPTIONS: &[&str] = &[
    "-rtDH",
    "--links",
    "--no-perms",
    "--no-group",
    "--no-owner",
    "--delete",
    "--delete-excluded",
];

/// rsync exit code for "some files vanished while transferring". Not an
/// error for a live filesystem source.
pub const RSYNC_EXIT_VANISHED: i32 = 24;

// -- Retention defaults --
pub const DEFAULT_KEEP_ALL: u32 = 2;
pub const DEFAULT_KEEP_ONE_PER_DAY: u32 = 7;
pub const DEFAULT_KEEP_ONE_PER_WEEK: u32 = 4;
pub const DEFAULT_KEEP_ONE_PER_MONTH: u32 = 24;
