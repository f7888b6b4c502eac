//! Ledger store: transactional persistence for accounts, instruments,
//! positions and the trade log
//!
//! One RocksDB instance, one column family per table. Every mutation that
//! must be atomic (a trade, a price tick, a registration) is staged on a
//! single WriteBatch through [`LedgerStore::apply`] and commits all-or-nothing.

pub mod codec;
pub mod db;
pub mod table;
pub mod tables;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use rust_decimal::Decimal;
use tracing::info;

use crate::core::portfolio::types::{Account, Position, TradeRecord};
use crate::core::types::market::Instrument;

pub use db::{LedgerBatch, LedgerDb, LedgerDbError as LedgerError};
pub use tables::{
    AccountCf, Credential, CredentialCf, InstrumentCf, PositionCf, PositionKey, TradeCf, TradeKey,
    ALL_COLUMN_FAMILIES,
};

/// Domain facade over the typed database
pub struct LedgerStore {
    db: LedgerDb,
    trade_seq: AtomicU64,
}

impl LedgerStore {
    /// Open (or create) the ledger at the given path and recover the trade
    /// sequence counter from the existing log.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let db = LedgerDb::open(path, ALL_COLUMN_FAMILIES.to_vec())?;

        let max_seq = db
            .scan::<TradeCf>()?
            .iter()
            .map(|(key, _)| key.seq)
            .max()
            .unwrap_or(0);

        Ok(Self {
            db,
            trade_seq: AtomicU64::new(max_seq),
        })
    }

    /// Next value of the store-wide monotone trade sequence
    pub fn next_trade_seq(&self) -> u64 {
        self.trade_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stage typed puts/deletes on one WriteBatch and commit atomically.
    /// An error from the closure discards the batch unwritten.
    pub fn apply<F>(&self, f: F) -> Result<(), LedgerError>
    where
        F: FnOnce(&mut LedgerBatch) -> Result<(), LedgerError>,
    {
        self.db.batch_write(f)
    }

    pub fn account(&self, id: &str) -> Result<Option<Account>, LedgerError> {
        self.db.get::<AccountCf>(&id.to_string())
    }

    pub fn credential(&self, account: &str) -> Result<Option<Credential>, LedgerError> {
        self.db.get::<CredentialCf>(&account.to_string())
    }

    pub fn account_exists(&self, id: &str) -> Result<bool, LedgerError> {
        self.db.exists::<AccountCf>(&id.to_string())
    }

    pub fn instrument(&self, symbol: &str) -> Result<Option<Instrument>, LedgerError> {
        self.db.get::<InstrumentCf>(&symbol.to_string())
    }

    /// All instruments, ordered by symbol (key order)
    pub fn instruments(&self) -> Result<Vec<Instrument>, LedgerError> {
        Ok(self
            .db
            .scan::<InstrumentCf>()?
            .into_iter()
            .map(|(_, instrument)| instrument)
            .collect())
    }

    pub fn position(&self, account: &str, symbol: &str) -> Result<Option<Position>, LedgerError> {
        self.db
            .get::<PositionCf>(&PositionKey::new(account, symbol))
    }

    /// All open positions of one account, ordered by symbol
    pub fn positions(&self, account: &str) -> Result<Vec<Position>, LedgerError> {
        Ok(self
            .db
            .scan_prefix::<PositionCf>(&PositionKey::account_prefix(account))?
            .into_iter()
            .map(|(_, position)| position)
            .collect())
    }

    /// Up to `limit` most recent trades of one account, newest first
    pub fn trades(&self, account: &str, limit: usize) -> Result<Vec<TradeRecord>, LedgerError> {
        let mut trades: Vec<TradeRecord> = self
            .db
            .scan_prefix::<TradeCf>(&TradeKey::account_prefix(account))?
            .into_iter()
            .map(|(_, trade)| trade)
            .collect();
        trades.reverse();
        trades.truncate(limit);
        Ok(trades)
    }

    /// Seed the instrument catalog, inserting only symbols not yet present.
    /// Safe to run on every startup.
    pub fn seed_instruments(&self, catalog: &[Instrument]) -> Result<usize, LedgerError> {
        let mut seeded = 0;
        for instrument in catalog {
            if !self.db.exists::<InstrumentCf>(&instrument.symbol)? {
                self.db.put::<InstrumentCf>(&instrument.symbol, instrument)?;
                seeded += 1;
            }
        }
        if seeded > 0 {
            info!(seeded, "Seeded instrument catalog");
        }
        Ok(seeded)
    }
}

/// The instrument catalog the service starts with
pub fn default_catalog() -> Vec<Instrument> {
    fn entry(symbol: &str, name: &str, price: Decimal) -> Instrument {
        Instrument::new(symbol, name, price)
    }

    vec![
        entry("AAPL", "Apple Inc.", Decimal::new(17550, 2)),
        entry("AMZN", "Amazon.com Inc.", Decimal::new(14530, 2)),
        entry("GOOGL", "Alphabet Inc.", Decimal::new(14025, 2)),
        entry("META", "Meta Platforms Inc.", Decimal::new(48560, 2)),
        entry("MSFT", "Microsoft Corporation", Decimal::new(38075, 2)),
        entry("NFLX", "Netflix Inc.", Decimal::new(44590, 2)),
        entry("NVDA", "NVIDIA Corporation", Decimal::new(49520, 2)),
        entry("TSLA", "Tesla Inc.", Decimal::new(24280, 2)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, LedgerStore) {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::open(dir.path().join("ledger")).unwrap();
        (dir, store)
    }

    fn account(id: &str, balance: Decimal) -> Account {
        Account {
            id: id.to_string(),
            balance,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_seed_is_idempotent() {
        let (_dir, store) = open_store();
        let catalog = default_catalog();

        assert_eq!(store.seed_instruments(&catalog).unwrap(), catalog.len());
        assert_eq!(store.seed_instruments(&catalog).unwrap(), 0);

        let instruments = store.instruments().unwrap();
        assert_eq!(instruments.len(), catalog.len());
        // Scan order is key order, i.e. sorted by symbol
        let mut symbols: Vec<&str> = instruments.iter().map(|i| i.symbol.as_str()).collect();
        let sorted = {
            let mut s = symbols.clone();
            s.sort();
            s
        };
        assert_eq!(symbols, sorted);
        symbols.dedup();
        assert_eq!(symbols.len(), catalog.len());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let (_dir, store) = open_store();
        store
            .apply(|batch| batch.put::<AccountCf>(&"alice".to_string(), &account("alice", dec!(100))))
            .unwrap();

        // Stage a visible mutation, then abort the batch
        let result = store.apply(|batch| {
            batch.put::<AccountCf>(&"alice".to_string(), &account("alice", dec!(0)))?;
            batch.put::<TradeCf>(
                &TradeKey::new("alice", 1),
                &TradeRecord {
                    seq: 1,
                    account: "alice".to_string(),
                    symbol: "AAPL".to_string(),
                    side: crate::core::types::common::Side::Buy,
                    quantity: 1,
                    price: dec!(100),
                    total: dec!(100),
                    executed_at: Utc::now(),
                },
            )?;
            Err(LedgerError::BatchAborted("injected failure".into()))
        });
        assert!(result.is_err());

        // Neither staged write is visible
        assert_eq!(store.account("alice").unwrap().unwrap().balance, dec!(100));
        assert!(store.trades("alice", 10).unwrap().is_empty());
    }

    #[test]
    fn test_trades_newest_first_with_limit() {
        let (_dir, store) = open_store();
        for _ in 0..5 {
            let seq = store.next_trade_seq();
            store
                .apply(|batch| {
                    batch.put::<TradeCf>(
                        &TradeKey::new("alice", seq),
                        &TradeRecord {
                            seq,
                            account: "alice".to_string(),
                            symbol: "AAPL".to_string(),
                            side: crate::core::types::common::Side::Buy,
                            quantity: 1,
                            price: dec!(10),
                            total: dec!(10),
                            executed_at: Utc::now(),
                        },
                    )
                })
                .unwrap();
        }

        let trades = store.trades("alice", 3).unwrap();
        assert_eq!(trades.len(), 3);
        assert_eq!(trades[0].seq, 5);
        assert_eq!(trades[1].seq, 4);
        assert_eq!(trades[2].seq, 3);

        // Another account's log is untouched
        assert!(store.trades("bob", 10).unwrap().is_empty());
    }

    #[test]
    fn test_position_delete_removes_row() {
        let (_dir, store) = open_store();
        let key = PositionKey::new("alice", "AAPL");
        store
            .apply(|batch| {
                batch.put::<PositionCf>(
                    &key,
                    &Position {
                        account: "alice".to_string(),
                        symbol: "AAPL".to_string(),
                        quantity: 10,
                        average_price: dec!(175.50),
                    },
                )
            })
            .unwrap();
        assert!(store.position("alice", "AAPL").unwrap().is_some());

        store
            .apply(|batch| batch.delete::<PositionCf>(&key))
            .unwrap();
        assert!(store.position("alice", "AAPL").unwrap().is_none());
        assert!(store.positions("alice").unwrap().is_empty());
    }

    #[test]
    fn test_trade_seq_recovered_on_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger");
        {
            let store = LedgerStore::open(&path).unwrap();
            let seq = store.next_trade_seq();
            assert_eq!(seq, 1);
            store
                .apply(|batch| {
                    batch.put::<TradeCf>(
                        &TradeKey::new("alice", seq),
                        &TradeRecord {
                            seq,
                            account: "alice".to_string(),
                            symbol: "AAPL".to_string(),
                            side: crate::core::types::common::Side::Sell,
                            quantity: 1,
                            price: dec!(10),
                            total: dec!(10),
                            executed_at: Utc::now(),
                        },
                    )
                })
                .unwrap();
        }

        let store = LedgerStore::open(&path).unwrap();
        assert_eq!(store.next_trade_seq(), 2);
    }
}
