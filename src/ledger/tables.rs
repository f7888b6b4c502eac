//! Column-family definitions for the ledger
//!
//! Five logical tables share one RocksDB instance: accounts, credentials,
//! instruments, positions and the append-only trade log. Composite keys are
//! encoded order-preserving so prefix scans return rows in key order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::portfolio::types::{Account, Position, TradeRecord};
use crate::core::types::market::Instrument;
use crate::ledger::codec::{CodecError, DbCodec};
use crate::{define_cf, define_cf_with_key};

/// Separator byte between components of a composite key. Account ids and
/// symbols are validated to printable ASCII, so 0x00 never collides.
const KEY_SEP: u8 = 0x00;

/// Stored login credential, owned by the auth glue. Kept out of `Account`
/// so the trading engine never sees password material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub account: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Composite key for positions: one row per (account, symbol)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionKey {
    pub account: String,
    pub symbol: String,
}

impl PositionKey {
    pub fn new(account: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            symbol: symbol.into(),
        }
    }

    /// Raw prefix selecting every position of one account
    pub fn account_prefix(account: &str) -> Vec<u8> {
        let mut prefix = account.as_bytes().to_vec();
        prefix.push(KEY_SEP);
        prefix
    }
}

pub struct PositionKeyCodec;

impl DbCodec<PositionKey> for PositionKeyCodec {
    fn encode(key: &PositionKey) -> Result<Vec<u8>, CodecError> {
        let mut bytes = key.account.as_bytes().to_vec();
        bytes.push(KEY_SEP);
        bytes.extend_from_slice(key.symbol.as_bytes());
        Ok(bytes)
    }

    fn decode(data: &[u8]) -> Result<PositionKey, CodecError> {
        let sep = data
            .iter()
            .position(|&b| b == KEY_SEP)
            .ok_or_else(|| CodecError::MalformedKey("position key missing separator".into()))?;
        let account = String::from_utf8(data[..sep].to_vec())
            .map_err(|e| CodecError::MalformedKey(e.to_string()))?;
        let symbol = String::from_utf8(data[sep + 1..].to_vec())
            .map_err(|e| CodecError::MalformedKey(e.to_string()))?;
        Ok(PositionKey { account, symbol })
    }
}

/// Composite key for the trade log: account, then big-endian sequence number
/// so a prefix scan yields one account's trades oldest-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeKey {
    pub account: String,
    pub seq: u64,
}

impl TradeKey {
    pub fn new(account: impl Into<String>, seq: u64) -> Self {
        Self {
            account: account.into(),
            seq,
        }
    }

    /// Raw prefix selecting every trade of one account
    pub fn account_prefix(account: &str) -> Vec<u8> {
        let mut prefix = account.as_bytes().to_vec();
        prefix.push(KEY_SEP);
        prefix
    }
}

pub struct TradeKeyCodec;

impl DbCodec<TradeKey> for TradeKeyCodec {
    fn encode(key: &TradeKey) -> Result<Vec<u8>, CodecError> {
        let mut bytes = key.account.as_bytes().to_vec();
        bytes.push(KEY_SEP);
        bytes.extend_from_slice(&key.seq.to_be_bytes());
        Ok(bytes)
    }

    fn decode(data: &[u8]) -> Result<TradeKey, CodecError> {
        if data.len() < 9 {
            return Err(CodecError::MalformedKey("trade key too short".into()));
        }
        let sep = data.len() - 9;
        if data[sep] != KEY_SEP {
            return Err(CodecError::MalformedKey(
                "trade key missing separator".into(),
            ));
        }
        let account = String::from_utf8(data[..sep].to_vec())
            .map_err(|e| CodecError::MalformedKey(e.to_string()))?;
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&data[sep + 1..]);
        Ok(TradeKey {
            account,
            seq: u64::from_be_bytes(seq_bytes),
        })
    }
}

define_cf!(AccountCf, Account, "accounts");
define_cf!(CredentialCf, Credential, "credentials");
define_cf!(InstrumentCf, Instrument, "instruments");
define_cf_with_key!(PositionCf, PositionKey, PositionKeyCodec, Position, "positions");
define_cf_with_key!(TradeCf, TradeKey, TradeKeyCodec, TradeRecord, "trades");

/// Every column family the database is opened with
pub const ALL_COLUMN_FAMILIES: &[&str] =
    &["accounts", "credentials", "instruments", "positions", "trades"];
