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

//! coati takes file-level incremental snapshots of local directories
//! into a repository directory. rsync does the copying and the
//! hardlink-based deduplication against the previous snapshot; coati
//! owns snapshot identity, sealing, metadata capture and retention.

pub mod archiver;
pub mod commands;
pub mod config;
pub mod global;
pub mod repository;
pub mod snapshotlog;
pub mod ui;
pub mod users;
pub mod utils;
