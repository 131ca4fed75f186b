// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `sbd`: the simple-bot daemon binary.

use clap::Parser;
use sb_core::{Config, LogBuffer};
use sb_daemon::{Daemon, ListenerSet};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sbd", about = "Chat-to-agent multiplexing daemon", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("sbd: {e}");
            std::process::exit(2);
        }
    };

    let logbuf = LogBuffer::new();
    let _log_guard = sb_daemon::logging::init(logbuf.clone(), config.logging.dir.as_deref());

    // Platform SDK listeners (Matrix, Discord) plug in out of tree; the
    // in-tree surfaces are the webhook, the attach socket, and cron.
    let listeners = ListenerSet::new(Vec::new());

    let daemon = match Daemon::new(config, listeners, logbuf) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "daemon startup failed");
            std::process::exit(2);
        }
    };

    match daemon.run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "daemon failed");
            std::process::exit(1);
        }
    }
}
