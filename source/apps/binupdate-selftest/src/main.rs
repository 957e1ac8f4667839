// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host entrypoint: seeds an in-memory slot store and runs the selftest.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use binupdate::{Activation, MemSlotStore};
use binupdate_selftest::{demo_image, CancelToken, Orchestrator, SelftestConfig};
use clap::Parser;
use log::{error, info, warn};

#[derive(Parser)]
#[command(name = "binupdate-selftest", about = "Binary image update and integrity selftest")]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of iterations (overrides the config)
    #[arg(long, conflicts_with = "forever")]
    repeat: Option<u64>,

    /// Run until a newline arrives on stdin
    #[arg(long)]
    forever: bool,

    /// Wait after each reload request, in milliseconds (overrides the config)
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Payload size of the seeded image
    #[arg(long, default_value_t = 1024)]
    payload_size: usize,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("binupdate-selftest: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SelftestConfig::load(path)?,
        None => SelftestConfig::default(),
    };
    if let Some(repeat) = cli.repeat {
        config.repetitions = repeat;
    }
    if let Some(grace_ms) = cli.grace_ms {
        config.reload_grace_ms = grace_ms;
    }

    // Activation lands well inside the grace period.
    let store = MemSlotStore::new(Activation::Deferred(config.reload_grace() / 4));
    let seeded = store.seed(&demo_image(&config.app_name, "3", cli.payload_size)?)?;
    info!("seeded {seeded}");

    let repetitions = config.repetitions;
    let mut orchestrator = Orchestrator::new(store, config);
    let summary = if cli.forever {
        let token = CancelToken::new();
        let stopper = token.clone();
        thread::spawn(move || {
            if !stopper.cancel_on_line(io::stdin().lock()) {
                warn!("stdin closed; interrupt the process to stop");
            }
        });
        info!("press enter to stop after the current iteration");
        orchestrator.run_until_cancelled(&token)
    } else {
        orchestrator.run_ntimes(repetitions)
    };
    Ok(summary.is_clean())
}
