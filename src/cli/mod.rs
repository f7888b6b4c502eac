//! CLI module for stocksim
//!
//! Uses clap for argument parsing and a structured command pattern: each
//! subcommand owns an Args struct and a Command struct with an `execute`
//! method.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

use crate::data_paths::{DataPaths, DEFAULT_DATA_DIR};

use commands::serve::{ServeArgs, ServeCommand};
use commands::stocks::{StocksArgs, StocksCommand};

#[derive(Parser)]
#[command(name = "stocksim")]
#[command(version)]
#[command(about = "Simulated live stock market with a trading engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory path (default: ./data)
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the market service (price feed, trading API, WebSocket feed)
    Serve(ServeArgs),

    /// Print the current instrument catalog from the ledger
    Stocks(StocksArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let data_paths = DataPaths::new(&self.data_dir);

        // Ensure all directories exist
        data_paths.ensure_directories()?;

        match self.command {
            Commands::Serve(args) => ServeCommand::new(args).execute(data_paths).await,
            Commands::Stocks(args) => StocksCommand::new(args).execute(data_paths).await,
        }
    }
}
