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

use anyhow::{Result, bail};
use chrono::Local;
use clap::Args;

use crate::{archiver::Archiver, repository::sid::Sid, ui};

use super::GlobalArgs;

#[derive(Args, Debug)]
#[clap(about = "Take a new snapshot")]
pub struct CmdArgs {}

pub fn run(global: &GlobalArgs, _args: &CmdArgs) -> Result<()> {
    let cfg = super::load_config(global)?;

    let includes = cfg.include();
    if includes.is_empty() {
        bail!("Nothing to back up: the include list is empty");
    }

    let now = Local::now().naive_local();
    let sid = Sid::from_datetime(now, cfg.clone());

    let mut archiver = Archiver::new(cfg);
    let (created, had_errors) = archiver.take_snapshot(&sid, now, &includes);

    if created {
        ui::cli::log!("New snapshot {}", sid.display_id());
    } else {
        ui::cli::log!("No new snapshot was taken");
    }

    if had_errors {
        bail!("Snapshot run finished with errors");
    }

    Ok(())
}
