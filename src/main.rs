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

use clap::{Parser, Subcommand};
use colored::Colorize;

use coati::commands::{self, GlobalArgs};

#[derive(Parser, Debug)]
#[clap(name = "coati", version, about = "Incremental snapshots with rsync")]
struct Cli {
    #[clap(flatten)]
    global: GlobalArgs,

    #[clap(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    Backup(commands::cmd_backup::CmdArgs),
    Restore(commands::cmd_restore::CmdArgs),
    List(commands::cmd_list::CmdArgs),
    Remove(commands::cmd_remove::CmdArgs),
    SmartRemove(commands::cmd_smartremove::CmdArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        CliCommand::Backup(args) => commands::cmd_backup::run(&cli.global, args),
        CliCommand::Restore(args) => commands::cmd_restore::run(&cli.global, args),
        CliCommand::List(args) => commands::cmd_list::run(&cli.global, args),
        CliCommand::Remove(args) => commands::cmd_remove::run(&cli.global, args),
        CliCommand::SmartRemove(args) => commands::cmd_smartremove::run(&cli.global, args),
    };

    if let Err(e) = result {
        eprintln!("{} {e:#}", "Error:".bold().red());
        std::process::exit(1);
    }
}
