use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tokio::sync::watch;
use tracing::info;

use crate::auth::AuthService;
use crate::config::MarketConfig;
use crate::core::feed::PriceFeed;
use crate::core::hub::BroadcastHub;
use crate::core::portfolio::PortfolioEngine;
use crate::data_paths::DataPaths;
use crate::ledger::{default_catalog, LedgerStore};
use crate::logging::{init_logging, LoggingConfig};
use crate::server::{run_server, AppState};

#[derive(Args, Clone)]
pub struct ServeArgs {
    /// Bind port (overrides config file)
    #[arg(long)]
    pub port: Option<u16>,

    /// Price tick period in milliseconds (overrides config file)
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Optional YAML config file
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub struct ServeCommand {
    args: ServeArgs,
}

impl ServeCommand {
    pub fn new(args: ServeArgs) -> Self {
        Self { args }
    }

    pub async fn execute(&self, data_paths: DataPaths) -> Result<()> {
        init_logging(LoggingConfig::new(data_paths.clone()))?;

        let mut config = match &self.args.config {
            Some(path) => MarketConfig::from_file(path)?,
            None => MarketConfig::default(),
        };
        if let Some(port) = self.args.port {
            config.port = port;
        }
        if let Some(tick_ms) = self.args.tick_ms {
            config.tick_ms = tick_ms;
        }

        let ledger = Arc::new(LedgerStore::open(data_paths.db())?);
        ledger.seed_instruments(&default_catalog())?;

        let secret = AuthService::load_or_create_secret(&data_paths)?;
        let auth = Arc::new(AuthService::new(
            Arc::clone(&ledger),
            secret,
            config.starting_balance,
        ));
        let engine = Arc::new(PortfolioEngine::new(Arc::clone(&ledger), &config));
        let hub = Arc::new(BroadcastHub::new(config.subscriber_buffer));
        let feed = PriceFeed::new(Arc::clone(&ledger), Arc::clone(&hub), &config);

        // The feed task is the single writer of prices; the sender side of
        // the watch channel lives as long as the server below
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(feed.run(shutdown_rx));

        info!(
            port = config.port,
            tick_ms = config.tick_ms,
            "🚀 stocksim service starting"
        );

        run_server(
            AppState {
                ledger,
                engine,
                hub,
                auth,
            },
            config.port,
        )
        .await
    }
}
