//! Portfolio domain types: accounts, positions, the trade log

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::types::common::Side;

/// A user account. Balance is mutated only by the trading engine, always as
/// part of an atomic trade batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

/// One account's holding in one instrument. Exists only while quantity > 0;
/// a sell that empties the position deletes the record instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub account: String,
    pub symbol: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub average_price: Decimal,
}

/// Append-only trade log entry. Never mutated or deleted; `seq` gives a
/// store-wide total order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub seq: u64,
    pub account: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// A position annotated with the instrument's current price and unrealized
/// profit/loss, as returned by the portfolio query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: String,
    pub name: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub average_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub profit_loss: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub profit_loss_percent: Decimal,
}

/// Result of a completed buy or sell
#[derive(Debug, Clone, Serialize)]
pub struct TradeOutcome {
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    pub trade: TradeRecord,
}
