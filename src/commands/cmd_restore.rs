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

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use crate::{archiver::Archiver, ui};

use super::GlobalArgs;

#[derive(Args, Debug)]
#[clap(about = "Restore a path from a snapshot")]
pub struct CmdArgs {
    /// Snapshot to restore from (identifier or 'last')
    #[clap(value_parser)]
    pub snapshot: String,

    /// Absolute path to restore
    #[clap(value_parser)]
    pub path: PathBuf,

    /// Restore below this directory instead of the original location
    #[clap(long, value_parser)]
    pub to: Option<PathBuf>,
}

pub fn run(global: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let cfg = super::load_config(global)?;
    let sid = super::find_snapshot(&cfg, &args.snapshot)?;

    let mut archiver = Archiver::new(cfg);
    archiver.restore(&sid, &args.path, args.to.as_deref(), &mut |message| {
        ui::cli::log!("{message}");
    })?;

    if archiver.restore_permission_failed {
        ui::cli::warning!("Some permissions could not be restored");
    }

    Ok(())
}
