//! Externally stable handle for a position across recomputation.

use crate::domain::{AccountId, Symbol, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const POSITION_KEY_VERSION: &str = "v1";

/// `v1:{account}:{symbol}:{epoch_ms}`.
///
/// Stable while the position stays open; a position that goes flat and
/// reopens gets a new epoch and therefore a new key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub epoch: TimeMs,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionKeyParseError {
    #[error("unsupported position key version: {0}")]
    Version(String),
    #[error("malformed position key: {0}")]
    Malformed(String),
}

impl PositionKey {
    pub fn new(account_id: AccountId, symbol: Symbol, epoch: TimeMs) -> Self {
        PositionKey {
            account_id,
            symbol,
            epoch,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            POSITION_KEY_VERSION,
            self.account_id,
            self.symbol,
            self.epoch.as_ms()
        )
    }
}

impl FromStr for PositionKey {
    type Err = PositionKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PositionKeyParseError::Malformed(s.to_string());

        let (version, rest) = s.split_once(':').ok_or_else(malformed)?;
        if version != POSITION_KEY_VERSION {
            return Err(PositionKeyParseError::Version(version.to_string()));
        }
        let (rest, epoch) = rest.rsplit_once(':').ok_or_else(malformed)?;
        let (account, symbol) = rest.split_once(':').ok_or_else(malformed)?;
        if account.is_empty() || symbol.is_empty() {
            return Err(malformed());
        }
        let epoch: i64 = epoch.parse().map_err(|_| malformed())?;

        Ok(PositionKey::new(
            AccountId::new(account),
            Symbol::new(symbol),
            TimeMs::new(epoch),
        ))
    }
}

impl Serialize for PositionKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PositionKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
