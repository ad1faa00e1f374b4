// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


// Developer tooling for the larder workspace.
// Run with: cargo xtask <command>

mod commands;
mod helpers;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "xtask", about = "Developer tasks for the larder workspace", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a reference package from the directories listed in a manifest.
    Pack {
        /// Manifest describing the sources to pack.
        #[arg(long, default_value = "Assets.toml")]
        manifest: PathBuf,

        /// Overrides the manifest's `output` path.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Command::Pack { manifest, out } => commands::pack::run(&manifest, out),
    };

    if let Err(e) = result {
        helpers::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
