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
use chrono::Local;
use clap::Args;

use crate::{archiver::Archiver, ui};

use super::GlobalArgs;

#[derive(Args, Debug)]
#[clap(about = "Apply the retention policy and delete old snapshots")]
pub struct CmdArgs {
    /// Keep all snapshots of the last N days
    #[clap(long, value_parser)]
    pub keep_all: Option<u32>,

    /// Keep one snapshot per day for the last N days
    #[clap(long, value_parser)]
    pub keep_one_per_day: Option<u32>,

    /// Keep one snapshot per week for the last N weeks
    #[clap(long, value_parser)]
    pub keep_one_per_week: Option<u32>,

    /// Keep one snapshot per month for the last N months
    #[clap(long, value_parser)]
    pub keep_one_per_month: Option<u32>,
}

pub fn run(global: &GlobalArgs, args: &CmdArgs) -> Result<()> {
    let cfg = super::load_config(global)?;

    let keep_all = args.keep_all.unwrap_or_else(|| cfg.keep_all());
    let per_day = args.keep_one_per_day.unwrap_or_else(|| cfg.keep_one_per_day());
    let per_week = args
        .keep_one_per_week
        .unwrap_or_else(|| cfg.keep_one_per_week());
    let per_month = args
        .keep_one_per_month
        .unwrap_or_else(|| cfg.keep_one_per_month());

    let now = Local::now().naive_local();
    let mut archiver = Archiver::new(cfg);
    let deleted = archiver.smart_remove(now, keep_all, per_day, per_week, per_month)?;

    ui::cli::log!("Removed {} snapshot(s)", deleted.len());

    Ok(())
}
