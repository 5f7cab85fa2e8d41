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

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::{repository, ui};

use super::GlobalArgs;

#[derive(Args, Debug)]
#[clap(about = "List the snapshots in the repository")]
pub struct CmdArgs {
    /// Include the in-progress working snapshot, if one exists
    #[clap(long, default_value_t = false)]
    pub include_new: bool,

    /// Oldest first instead of newest first
    #[clap(long, default_value_t = false)]
    pub oldest_first: bool,
}

pub fn run(global: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let cfg = super::load_config(global)?;

    let snapshots = repository::list_snapshots(&cfg, args.include_new, !args.oldest_first);
    for sid in &snapshots {
        if sid.is_real() {
            ui::cli::log!("{}  {}", sid.sid().bold(), sid.display_name());
        } else {
            ui::cli::log!("{}", sid.sid().bold().yellow());
        }
    }

    if snapshots.is_empty() {
        ui::cli::log!("The repository contains no snapshots");
    }

    Ok(())
}
