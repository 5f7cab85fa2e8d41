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

pub mod cmd_backup;
pub mod cmd_list;
pub mod cmd_remove;
pub mod cmd_restore;
pub mod cmd_smartremove;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::Args;

use crate::{
    config::Config,
    repository::{self, sid::Sid},
};

#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Path to the configuration file
    #[clap(long, global = true, value_parser)]
    pub config: Option<PathBuf>,
}

/// Loads the configuration named on the command line, or the default
/// one under the user configuration directory.
pub fn load_config(global: &GlobalArgs) -> Result<Arc<Config>> {
    let path = match &global.config {
        Some(path) => path.clone(),
        None => dirs::config_dir()
            .with_context(|| "Could not determine the configuration directory")?
            .join("coati")
            .join("config"),
    };

    if !path.is_file() {
        bail!("Configuration file '{}' does not exist", path.display());
    }

    Ok(Arc::new(Config::new(path)))
}

/// Resolves a snapshot argument: a canonical identifier or "last".
pub fn find_snapshot(cfg: &Arc<Config>, which: &str) -> Result<Sid> {
    if which == "last" {
        return repository::last_snapshot(cfg)
            .with_context(|| "The repository contains no snapshots");
    }

    let sid = Sid::new(which, cfg.clone())?;
    if !sid.exists() {
        bail!("Snapshot '{which}' does not exist");
    }
    Ok(sid)
}
