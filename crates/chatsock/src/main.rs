// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::error;

use chatsock::config::{Cli, Command};
use chatsock::demo;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down");
            }
            shutdown.cancel();
        });
    }

    let result = match cli.command {
        Command::Serve { host, port } => demo::serve(&host, port, cli.engine, shutdown).await,
        Command::Dial { url, linger_secs } => {
            demo::dial(&url, Duration::from_secs(linger_secs), cli.engine, shutdown).await
        }
    };

    if let Err(e) = result {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
