//! Portfolio engine: buy/sell execution with average-cost accounting

pub mod engine;
pub mod types;

pub use engine::{PortfolioEngine, TradeError};
