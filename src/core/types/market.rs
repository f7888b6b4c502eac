//! Instrument catalog types and the price-broadcast wire message

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A tradable instrument. `current_price` is written only by the price feed;
/// `base_price` never changes after seeding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub base_price: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub current_price: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, name: impl Into<String>, base_price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            name: name.into(),
            base_price,
            current_price: base_price,
            last_updated: Utc::now(),
        }
    }
}

/// Envelope pushed to every subscriber on connect and after every tick.
/// The same schema serves both the initial snapshot and tick updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Vec<Instrument>,
}

impl StockUpdate {
    pub const KIND: &'static str = "stock_update";

    pub fn new(data: Vec<Instrument>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            data,
        }
    }
}
