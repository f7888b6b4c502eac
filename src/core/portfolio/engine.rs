//! Trading engine
//!
//! Executes buy/sell orders against the ledger under per-account locks.
//! Each order reads the instrument's current price exactly once at
//! validation time and reuses that value for every computation, so a price
//! tick landing mid-trade cannot split an order across two prices. All
//! mutations of one order (balance, position, trade record) commit through
//! a single ledger batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::MarketConfig;
use crate::core::portfolio::types::{Account, Position, PositionView, TradeOutcome, TradeRecord};
use crate::core::types::common::Side;
use crate::ledger::{
    AccountCf, LedgerError, LedgerStore, PositionCf, PositionKey, TradeCf, TradeKey,
};

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("invalid order: {0}")]
    InvalidOrder(String),
    #[error("stock not found: {0}")]
    UnknownInstrument(String),
    #[error("insufficient balance")]
    InsufficientFunds,
    #[error("insufficient shares to sell")]
    InsufficientShares,
    #[error("service busy, retry later")]
    ServiceBusy,
    #[error("not authenticated")]
    Unauthenticated,
    #[error("storage error: {0}")]
    Storage(#[from] LedgerError),
}

/// Trading engine over the ledger store. Cheap to clone via Arc in callers;
/// one instance serves all requests.
pub struct PortfolioEngine {
    ledger: Arc<LedgerStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    lock_timeout: Duration,
    history_limit: usize,
}

impl PortfolioEngine {
    pub fn new(ledger: Arc<LedgerStore>, config: &MarketConfig) -> Self {
        Self {
            ledger,
            locks: DashMap::new(),
            lock_timeout: config.lock_timeout(),
            history_limit: config.history_limit,
        }
    }

    /// Buy `quantity` shares of `symbol` at the current price.
    pub async fn buy(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: u32,
    ) -> Result<TradeOutcome, TradeError> {
        if quantity == 0 {
            return Err(TradeError::InvalidOrder("quantity must be positive".into()));
        }

        let _guard = self.lock_account(account_id).await?;

        let instrument = self
            .ledger
            .instrument(symbol)?
            .ok_or_else(|| TradeError::UnknownInstrument(symbol.to_string()))?;

        // The one and only price read for this order
        let price = instrument.current_price;
        let cost = price * Decimal::from(quantity);

        let account = self
            .ledger
            .account(account_id)?
            .ok_or(TradeError::Unauthenticated)?;
        if account.balance < cost {
            return Err(TradeError::InsufficientFunds);
        }

        let position = match self.ledger.position(account_id, symbol)? {
            Some(existing) => {
                let new_quantity = existing
                    .quantity
                    .checked_add(quantity)
                    .ok_or_else(|| TradeError::InvalidOrder("position overflow".into()))?;
                let new_average = (existing.average_price * Decimal::from(existing.quantity)
                    + cost)
                    / Decimal::from(new_quantity);
                Position {
                    quantity: new_quantity,
                    average_price: new_average,
                    ..existing
                }
            }
            None => Position {
                account: account_id.to_string(),
                symbol: symbol.to_string(),
                quantity,
                average_price: price,
            },
        };

        let updated = Account {
            balance: account.balance - cost,
            ..account
        };
        let trade = TradeRecord {
            seq: self.ledger.next_trade_seq(),
            account: account_id.to_string(),
            symbol: symbol.to_string(),
            side: Side::Buy,
            quantity,
            price,
            total: cost,
            executed_at: Utc::now(),
        };

        self.ledger.apply(|batch| {
            batch.put::<AccountCf>(&updated.id, &updated)?;
            batch.put::<PositionCf>(&PositionKey::new(account_id, symbol), &position)?;
            batch.put::<TradeCf>(&TradeKey::new(account_id, trade.seq), &trade)
        })?;

        info!(
            account = %account_id,
            symbol = %symbol,
            quantity,
            price = %price,
            total = %cost,
            "Buy executed"
        );

        Ok(TradeOutcome {
            balance: updated.balance,
            trade,
        })
    }

    /// Sell `quantity` shares of `symbol` at the current price.
    pub async fn sell(
        &self,
        account_id: &str,
        symbol: &str,
        quantity: u32,
    ) -> Result<TradeOutcome, TradeError> {
        if quantity == 0 {
            return Err(TradeError::InvalidOrder("quantity must be positive".into()));
        }

        let _guard = self.lock_account(account_id).await?;

        let instrument = self
            .ledger
            .instrument(symbol)?
            .ok_or_else(|| TradeError::UnknownInstrument(symbol.to_string()))?;

        let position = self
            .ledger
            .position(account_id, symbol)?
            .ok_or(TradeError::InsufficientShares)?;
        if position.quantity < quantity {
            return Err(TradeError::InsufficientShares);
        }

        // The one and only price read for this order
        let price = instrument.current_price;
        let revenue = price * Decimal::from(quantity);

        let account = self
            .ledger
            .account(account_id)?
            .ok_or(TradeError::Unauthenticated)?;

        let updated = Account {
            balance: account.balance + revenue,
            ..account
        };
        let trade = TradeRecord {
            seq: self.ledger.next_trade_seq(),
            account: account_id.to_string(),
            symbol: symbol.to_string(),
            side: Side::Sell,
            quantity,
            price,
            total: revenue,
            executed_at: Utc::now(),
        };

        let key = PositionKey::new(account_id, symbol);
        let remaining = position.quantity - quantity;
        self.ledger.apply(|batch| {
            batch.put::<AccountCf>(&updated.id, &updated)?;
            if remaining == 0 {
                batch.delete::<PositionCf>(&key)?;
            } else {
                // Average cost is untouched by a sell
                batch.put::<PositionCf>(
                    &key,
                    &Position {
                        quantity: remaining,
                        ..position.clone()
                    },
                )?;
            }
            batch.put::<TradeCf>(&TradeKey::new(account_id, trade.seq), &trade)
        })?;

        info!(
            account = %account_id,
            symbol = %symbol,
            quantity,
            price = %price,
            total = %revenue,
            "Sell executed"
        );

        Ok(TradeOutcome {
            balance: updated.balance,
            trade,
        })
    }

    /// All open positions of the account, annotated with unrealized P/L at
    /// the current price.
    pub fn positions(&self, account_id: &str) -> Result<Vec<PositionView>, TradeError> {
        let mut views = Vec::new();
        for position in self.ledger.positions(account_id)? {
            let Some(instrument) = self.ledger.instrument(&position.symbol)? else {
                debug!(symbol = %position.symbol, "Position references unknown instrument, skipping");
                continue;
            };
            let quantity = Decimal::from(position.quantity);
            let profit_loss = (instrument.current_price - position.average_price) * quantity;
            let profit_loss_percent = if position.average_price.is_zero() {
                Decimal::ZERO
            } else {
                (instrument.current_price - position.average_price) / position.average_price
                    * Decimal::ONE_HUNDRED
            };
            views.push(PositionView {
                symbol: position.symbol,
                name: instrument.name,
                quantity: position.quantity,
                average_price: position.average_price,
                current_price: instrument.current_price,
                profit_loss,
                profit_loss_percent,
            });
        }
        Ok(views)
    }

    /// Cash balance of the account
    pub fn balance(&self, account_id: &str) -> Result<Decimal, TradeError> {
        Ok(self
            .ledger
            .account(account_id)?
            .ok_or(TradeError::Unauthenticated)?
            .balance)
    }

    /// Most recent trades, newest first
    pub fn history(
        &self,
        account_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TradeRecord>, TradeError> {
        Ok(self
            .ledger
            .trades(account_id, limit.unwrap_or(self.history_limit))?)
    }

    /// Serialize all operations of one account; unrelated accounts proceed
    /// concurrently. Bounded wait, then ServiceBusy.
    async fn lock_account(
        &self,
        account_id: &str,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, TradeError> {
        let lock = self
            .locks
            .entry(account_id.to_string())
            .or_default()
            .clone();
        timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| TradeError::ServiceBusy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{default_catalog, InstrumentCf};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<LedgerStore>, PortfolioEngine) {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(LedgerStore::open(dir.path().join("ledger")).unwrap());
        ledger.seed_instruments(&default_catalog()).unwrap();
        let engine = PortfolioEngine::new(Arc::clone(&ledger), &MarketConfig::default());
        (dir, ledger, engine)
    }

    fn create_account(ledger: &LedgerStore, id: &str, balance: Decimal) {
        let account = Account {
            id: id.to_string(),
            balance,
            created_at: Utc::now(),
        };
        ledger
            .apply(|batch| batch.put::<AccountCf>(&account.id, &account))
            .unwrap();
    }

    fn set_price(ledger: &LedgerStore, symbol: &str, price: Decimal) {
        let mut instrument = ledger.instrument(symbol).unwrap().unwrap();
        instrument.current_price = price;
        ledger
            .apply(|batch| batch.put::<InstrumentCf>(&instrument.symbol, &instrument))
            .unwrap();
    }

    #[tokio::test]
    async fn test_buy_opens_position_and_debits_balance() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));
        set_price(&ledger, "AAPL", dec!(175.50));

        let outcome = engine.buy("alice", "AAPL", 10).await.unwrap();

        assert_eq!(outcome.balance, dec!(8245.00));
        assert_eq!(outcome.trade.side, Side::Buy);
        assert_eq!(outcome.trade.total, dec!(1755.00));

        let position = ledger.position("alice", "AAPL").unwrap().unwrap();
        assert_eq!(position.quantity, 10);
        assert_eq!(position.average_price, dec!(175.50));

        let trades = ledger.trades("alice", 10).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, dec!(175.50));
    }

    #[tokio::test]
    async fn test_buy_merges_position_with_weighted_average() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));
        set_price(&ledger, "AAPL", dec!(175.50));
        engine.buy("alice", "AAPL", 10).await.unwrap();

        // Price moves before the second buy; ticks never touch averages
        set_price(&ledger, "AAPL", dec!(180.00));
        let outcome = engine.buy("alice", "AAPL", 5).await.unwrap();

        let position = ledger.position("alice", "AAPL").unwrap().unwrap();
        assert_eq!(position.quantity, 15);
        assert_eq!(position.average_price, dec!(177.00));
        assert_eq!(outcome.balance, dec!(10000.00) - dec!(1755.00) - dec!(900.00));
    }

    #[tokio::test]
    async fn test_sell_all_deletes_position_and_credits_revenue() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));
        set_price(&ledger, "AAPL", dec!(175.50));
        engine.buy("alice", "AAPL", 10).await.unwrap();
        set_price(&ledger, "AAPL", dec!(180.00));
        engine.buy("alice", "AAPL", 5).await.unwrap();

        set_price(&ledger, "AAPL", dec!(190.00));
        let outcome = engine.sell("alice", "AAPL", 15).await.unwrap();

        assert_eq!(outcome.trade.total, dec!(2850.00));
        assert_eq!(outcome.trade.price, dec!(190.00));
        assert_eq!(
            outcome.balance,
            dec!(10000.00) - dec!(1755.00) - dec!(900.00) + dec!(2850.00)
        );
        assert!(ledger.position("alice", "AAPL").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_sell_keeps_average_price() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));
        set_price(&ledger, "AAPL", dec!(100.00));
        engine.buy("alice", "AAPL", 10).await.unwrap();

        set_price(&ledger, "AAPL", dec!(200.00));
        engine.sell("alice", "AAPL", 4).await.unwrap();

        let position = ledger.position("alice", "AAPL").unwrap().unwrap();
        assert_eq!(position.quantity, 6);
        assert_eq!(position.average_price, dec!(100.00));
    }

    #[tokio::test]
    async fn test_sell_without_shares_fails_and_mutates_nothing() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(500.00));

        let err = engine.sell("alice", "AAPL", 1).await.unwrap_err();
        assert!(matches!(err, TradeError::InsufficientShares));

        assert_eq!(ledger.account("alice").unwrap().unwrap().balance, dec!(500.00));
        assert!(ledger.trades("alice", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sell_more_than_held_fails() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));
        set_price(&ledger, "AAPL", dec!(100.00));
        engine.buy("alice", "AAPL", 5).await.unwrap();

        let err = engine.sell("alice", "AAPL", 6).await.unwrap_err();
        assert!(matches!(err, TradeError::InsufficientShares));

        let position = ledger.position("alice", "AAPL").unwrap().unwrap();
        assert_eq!(position.quantity, 5);
    }

    #[tokio::test]
    async fn test_buy_beyond_balance_fails_and_mutates_nothing() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(100.00));
        set_price(&ledger, "AAPL", dec!(175.50));

        let err = engine.buy("alice", "AAPL", 1).await.unwrap_err();
        assert!(matches!(err, TradeError::InsufficientFunds));

        assert_eq!(ledger.account("alice").unwrap().unwrap().balance, dec!(100.00));
        assert!(ledger.position("alice", "AAPL").unwrap().is_none());
        assert!(ledger.trades("alice", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));

        assert!(matches!(
            engine.buy("alice", "AAPL", 0).await.unwrap_err(),
            TradeError::InvalidOrder(_)
        ));
        assert!(matches!(
            engine.sell("alice", "AAPL", 0).await.unwrap_err(),
            TradeError::InvalidOrder(_)
        ));
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));

        assert!(matches!(
            engine.buy("alice", "DOGE", 1).await.unwrap_err(),
            TradeError::UnknownInstrument(_)
        ));
    }

    #[tokio::test]
    async fn test_positions_annotated_with_unrealized_pnl() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));
        set_price(&ledger, "AAPL", dec!(100.00));
        engine.buy("alice", "AAPL", 10).await.unwrap();
        set_price(&ledger, "AAPL", dec!(110.00));

        let views = engine.positions("alice").unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].profit_loss, dec!(100.00));
        assert_eq!(views[0].profit_loss_percent, dec!(10));
        assert_eq!(views[0].current_price, dec!(110.00));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));
        set_price(&ledger, "AAPL", dec!(10.00));
        engine.buy("alice", "AAPL", 1).await.unwrap();
        engine.buy("alice", "AAPL", 2).await.unwrap();
        engine.sell("alice", "AAPL", 3).await.unwrap();

        let history = engine.history("alice", None).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].side, Side::Sell);
        assert_eq!(history[2].quantity, 1);

        let limited = engine.history("alice", Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].side, Side::Sell);
    }

    #[tokio::test]
    async fn test_contended_account_lock_reports_busy() {
        let (_dir, ledger, _engine) = setup();
        create_account(&ledger, "alice", dec!(10000.00));

        let mut config = MarketConfig::default();
        config.lock_timeout_ms = 20;
        let engine = PortfolioEngine::new(Arc::clone(&ledger), &config);

        let lock = engine.locks.entry("alice".to_string()).or_default().clone();
        let _held = lock.lock_owned().await;

        let err = engine.buy("alice", "AAPL", 1).await.unwrap_err();
        assert!(matches!(err, TradeError::ServiceBusy));
    }

    #[tokio::test]
    async fn test_balance_never_goes_negative_over_random_walk() {
        let (_dir, ledger, engine) = setup();
        create_account(&ledger, "alice", dec!(1000.00));
        set_price(&ledger, "AAPL", dec!(333.00));

        for step in 0..20u32 {
            let quantity = step % 4 + 1;
            if step % 2 == 0 {
                let _ = engine.buy("alice", "AAPL", quantity).await;
            } else {
                let _ = engine.sell("alice", "AAPL", quantity).await;
            }
            let balance = ledger.account("alice").unwrap().unwrap().balance;
            assert!(balance >= Decimal::ZERO, "balance went negative: {balance}");
            if let Some(position) = ledger.position("alice", "AAPL").unwrap() {
                assert!(position.quantity > 0);
            }
        }
    }
}
