// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # mmd
//!
//! Command-line interface for the matmul dispatch engine.
//!
//! ## Usage
//! ```bash
//! # Show the plan and backend for one call
//! mmd plan --lhs 4,16 --rhs 16,8 --dtype f16 --soc ascend910b
//!
//! # Run a call on the host executor and compare against the reference
//! mmd run --lhs 2,64,128 --rhs 2,128,32 --dtype f16 --soc ascend950
//!
//! # Print capability and promotion tables
//! mmd inspect --soc ascend310p
//! ```

mod commands;

use clap::{Parser, Subcommand};

use commands::CallArgs;

#[derive(Parser)]
#[command(
    name = "mmd",
    about = "Plan and run NPU matmul dispatch on a host reference executor",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the plan and selected backend for one call.
    Plan {
        #[command(flatten)]
        call: CallArgs,

        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Execute one call on the host executor.
    Run {
        #[command(flatten)]
        call: CallArgs,

        /// Scale of the `self` term when `--bias` is given.
        #[arg(long, default_value_t = 1.0)]
        beta: f64,

        /// Scale of the product when `--bias` is given.
        #[arg(long, default_value_t = 1.0)]
        alpha: f64,
    },

    /// Print the capability table and a generation's promotion table.
    Inspect {
        /// Hardware generation (defaults to the configured one).
        #[arg(long)]
        soc: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Plan { call, json } => commands::plan::execute(config, call, json).await,
        Commands::Run { call, beta, alpha } => commands::run::execute(config, call, beta, alpha).await,
        Commands::Inspect { soc } => commands::inspect::execute(config, soc).await,
    }
}
