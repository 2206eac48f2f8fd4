// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Aibro - a room-based chat broker with an AI assistant.
//!
//! This is the binary entry point for the Aibro server.

mod serve;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Aibro - a room-based chat broker with an AI assistant.
#[derive(Parser, Debug)]
#[command(name = "aibro", version, about, long_about = None)]
struct Cli {
    /// Explicit config file path (skips the XDG hierarchy).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the chat broker.
    Serve,
    /// Print the effective configuration and exit.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = {
        let loaded = match &cli.config {
            Some(path) => aibro_config::load_config_from_path(path),
            None => aibro_config::load_config(),
        };
        match loaded {
            Ok(config) => config,
            Err(err) => {
                eprintln!("aibro: invalid configuration: {err}");
                std::process::exit(1);
            }
        }
    };

    init_tracing(&config.server.log_level);

    match cli.command {
        Some(Commands::Serve) => {
            if let Err(err) = serve::run(config).await {
                tracing::error!(error = %err, "broker exited with error");
                std::process::exit(1);
            }
        }
        Some(Commands::Config) => match toml::to_string_pretty(&config) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => {
                eprintln!("aibro: failed to render configuration: {err}");
                std::process::exit(1);
            }
        },
        None => {
            println!("aibro: use --help for available commands");
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
