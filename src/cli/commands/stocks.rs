use anyhow::Result;
use clap::Args;
use comfy_table::Table;

use crate::data_paths::DataPaths;
use crate::ledger::{default_catalog, LedgerStore};
use crate::logging::{init_logging, LoggingConfig};

#[derive(Args, Clone)]
pub struct StocksArgs {
    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub struct StocksCommand {
    args: StocksArgs,
}

impl StocksCommand {
    pub fn new(args: StocksArgs) -> Self {
        Self { args }
    }

    pub async fn execute(&self, data_paths: DataPaths) -> Result<()> {
        init_logging(LoggingConfig::new(data_paths.clone()))?;

        let ledger = LedgerStore::open(data_paths.db())?;
        ledger.seed_instruments(&default_catalog())?;
        let instruments = ledger.instruments()?;

        if self.args.json {
            println!("{}", serde_json::to_string_pretty(&instruments)?);
            return Ok(());
        }

        let mut table = Table::new();
        table.set_header(vec!["Symbol", "Name", "Base", "Current", "Last updated"]);
        for instrument in &instruments {
            table.add_row(vec![
                instrument.symbol.clone(),
                instrument.name.clone(),
                instrument.base_price.to_string(),
                instrument.current_price.to_string(),
                instrument.last_updated.to_rfc3339(),
            ]);
        }
        println!("{table}");

        Ok(())
    }
}
