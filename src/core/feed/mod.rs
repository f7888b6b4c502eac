//! Price feed: the sole writer of instrument prices
//!
//! Every tick perturbs each instrument's *current* price by a symmetric
//! random factor, so prices follow a random walk rather than reverting
//! toward their base price. All prices of one tick commit as one atomic
//! batch; a persistence failure skips the tick and the schedule carries on.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MarketConfig;
use crate::core::hub::BroadcastHub;
use crate::core::types::market::Instrument;
use crate::ledger::{InstrumentCf, LedgerError, LedgerStore};

pub struct PriceFeed {
    ledger: Arc<LedgerStore>,
    hub: Arc<BroadcastHub>,
    tick_period: std::time::Duration,
    max_drift_bp: i64,
    price_floor: Decimal,
}

impl PriceFeed {
    pub fn new(ledger: Arc<LedgerStore>, hub: Arc<BroadcastHub>, config: &MarketConfig) -> Self {
        Self {
            ledger,
            hub,
            tick_period: config.tick_period(),
            max_drift_bp: config.max_drift_bp,
            price_floor: config.price_floor,
        }
    }

    /// Advance every instrument's current price by one random-walk step and
    /// persist the whole batch atomically. Side effect only.
    pub fn tick(&self) -> Result<(), LedgerError> {
        let instruments = self.ledger.instruments()?;
        if instruments.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut rng = rand::rng();
        let updated: Vec<Instrument> = instruments
            .into_iter()
            .map(|mut instrument| {
                let drift_bp = rng.random_range(-self.max_drift_bp..=self.max_drift_bp);
                // 1.0000 ± drift, applied to the current price (random walk)
                let factor = Decimal::new(10_000 + drift_bp, 4);
                let next = (instrument.current_price * factor).round_dp(4);
                instrument.current_price = next.max(self.price_floor);
                instrument.last_updated = now;
                instrument
            })
            .collect();

        self.ledger.apply(|batch| {
            for instrument in &updated {
                batch.put::<InstrumentCf>(&instrument.symbol, instrument)?;
            }
            Ok(())
        })?;

        debug!(instruments = updated.len(), "Price tick applied");
        Ok(())
    }

    /// Ordered snapshot of all instruments at their current prices
    pub fn snapshot(&self) -> Result<Vec<Instrument>, LedgerError> {
        self.ledger.instruments()
    }

    /// Drive ticks on a fixed cadence until shutdown. A slow tick delays the
    /// next one; ticks never pipeline. Each successful tick is pushed to the
    /// broadcast hub.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval_at(Instant::now() + self.tick_period, self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_ms = self.tick_period.as_millis() as u64, "Price feed started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick() {
                        // A missed tick is invisible to users and self-heals
                        // on the next cycle
                        warn!(error = %e, "Price tick failed, skipping");
                        continue;
                    }
                    match self.snapshot() {
                        Ok(snapshot) => {
                            self.hub.publish(snapshot);
                        }
                        Err(e) => warn!(error = %e, "Snapshot after tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Price feed stopping");
                    break;
                }
            }
        }
    }
}
