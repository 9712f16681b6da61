//! Trade type representing a single normalized brokerage execution.

use crate::domain::{AccountId, Decimal, Symbol, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Instrument class of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentType {
    Stock,
    Option,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Stock => "STOCK",
            InstrumentType::Option => "OPTION",
        }
    }

    /// Contract multiplier used when the ingestion record carries none.
    pub fn default_multiplier(&self) -> Decimal {
        match self {
            InstrumentType::Stock => Decimal::one(),
            InstrumentType::Option => Decimal::hundred(),
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentType {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STOCK" => Ok(InstrumentType::Stock),
            "OPTION" => Ok(InstrumentType::Option),
            other => Err(ParseActionError::UnknownInstrument(other.to_string())),
        }
    }
}

/// Canonical action vocabulary produced by the ingestion collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Buy,
    Sell,
    BuyToOpen,
    BuyToClose,
    SellToOpen,
    SellToClose,
    Assignment,
    Exercises,
    #[serde(rename = "OPTIONEXPIRATION")]
    OptionExpiration,
    Split,
    Dividend,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseActionError {
    #[error("unrecognized action: {0}")]
    UnknownAction(String),
    #[error("unrecognized instrument type: {0}")]
    UnknownInstrument(String),
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::Buy,
        Action::Sell,
        Action::BuyToOpen,
        Action::BuyToClose,
        Action::SellToOpen,
        Action::SellToClose,
        Action::Assignment,
        Action::Exercises,
        Action::OptionExpiration,
        Action::Split,
        Action::Dividend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::BuyToOpen => "BUY_TO_OPEN",
            Action::BuyToClose => "BUY_TO_CLOSE",
            Action::SellToOpen => "SELL_TO_OPEN",
            Action::SellToClose => "SELL_TO_CLOSE",
            Action::Assignment => "ASSIGNMENT",
            Action::Exercises => "EXERCISES",
            Action::OptionExpiration => "OPTIONEXPIRATION",
            Action::Split => "SPLIT",
            Action::Dividend => "DIVIDEND",
        }
    }

    /// Actions the loader returns. DIVIDEND never changes a position.
    pub fn is_position_affecting(&self) -> bool {
        !matches!(self, Action::Dividend)
    }

    /// Actions that establish new exposure.
    pub fn is_opening(&self) -> bool {
        matches!(self, Action::Buy | Action::BuyToOpen | Action::SellToOpen)
    }

    /// Actions that may only reduce existing exposure.
    pub fn is_explicit_close(&self) -> bool {
        matches!(
            self,
            Action::BuyToClose | Action::SellToClose | Action::OptionExpiration
        )
    }

    /// Corporate actions are exempt from the zero-quantity check.
    pub fn is_corporate_action(&self) -> bool {
        matches!(self, Action::Split | Action::Dividend)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParseActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ParseActionError::UnknownAction(s.to_string()))
    }
}

/// Direction a trade moves exposure in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// A single normalized execution. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub account_id: AccountId,
    pub symbol: Symbol,
    pub instrument_type: InstrumentType,
    pub action: Action,
    /// Signed for OPTIONEXPIRATION; otherwise only the magnitude matters.
    pub quantity: Decimal,
    pub price: Decimal,
    pub multiplier: Decimal,
    pub executed_at: TimeMs,
    pub ingested_at: TimeMs,
}

impl Trade {
    /// Create a trade with the instrument's default multiplier and
    /// `ingested_at == executed_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        account_id: AccountId,
        symbol: Symbol,
        instrument_type: InstrumentType,
        action: Action,
        quantity: Decimal,
        price: Decimal,
        executed_at: TimeMs,
    ) -> Self {
        Trade {
            id: id.into(),
            account_id,
            symbol,
            instrument_type,
            action,
            quantity,
            price,
            multiplier: instrument_type.default_multiplier(),
            executed_at,
            ingested_at: executed_at,
        }
    }

    pub fn with_multiplier(mut self, multiplier: Decimal) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_ingested_at(mut self, ingested_at: TimeMs) -> Self {
        self.ingested_at = ingested_at;
        self
    }

    /// Classify the trade for lot matching.
    ///
    /// OPTIONEXPIRATION carries its direction in the quantity sign: negative
    /// closes a long (sell side), zero or positive closes a short (buy side).
    /// SPLIT and DIVIDEND do not match.
    pub fn side(&self) -> Option<Side> {
        match self.action {
            Action::Buy | Action::BuyToOpen | Action::BuyToClose | Action::Assignment => {
                Some(Side::Buy)
            }
            Action::Sell | Action::SellToOpen | Action::SellToClose | Action::Exercises => {
                Some(Side::Sell)
            }
            Action::OptionExpiration => {
                if self.quantity.is_negative() {
                    Some(Side::Sell)
                } else {
                    Some(Side::Buy)
                }
            }
            Action::Split | Action::Dividend => None,
        }
    }

    /// Evidence of opening history for phantom checks: any buy-side trade
    /// (ASSIGNMENT included) or a SELL_TO_OPEN.
    pub fn records_opening(&self) -> bool {
        self.side() == Some(Side::Buy) || self.action == Action::SellToOpen
    }

    /// Price the trade closes lots at. Expirations always close at zero.
    pub fn closing_price(&self) -> Decimal {
        match self.action {
            Action::OptionExpiration => Decimal::zero(),
            _ => self.price,
        }
    }

    pub fn abs_quantity(&self) -> Decimal {
        self.quantity.abs()
    }

    /// Content hash over the economic fields, independent of `id`.
    ///
    /// Two trades with different ids and the same fingerprint are a probable
    /// duplicate import.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.account_id.as_str());
        hasher.update(b"|");
        hasher.update(self.symbol.as_str());
        hasher.update(b"|");
        hasher.update(self.action.as_str());
        hasher.update(b"|");
        hasher.update(self.quantity.to_canonical_string());
        hasher.update(b"|");
        hasher.update(self.price.to_canonical_string());
        hasher.update(b"|");
        hasher.update(self.multiplier.to_canonical_string());
        hasher.update(self.executed_at.as_ms().to_le_bytes());
        let hash = hasher.finalize();
        hex::encode(&hash[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn trade(action: Action, qty: &str) -> Trade {
        Trade::new(
            "t1",
            AccountId::new("acct"),
            Symbol::new("XYZ"),
            InstrumentType::Stock,
            action,
            d(qty),
            d("10"),
            TimeMs::new(1_000),
        )
    }

    #[test]
    fn test_action_roundtrip_through_strings() {
        for action in Action::ALL {
            assert_eq!(Action::from_str(action.as_str()).unwrap(), action);
        }
    }

    #[test]
    fn test_unknown_action_is_an_error() {
        let err = Action::from_str("BUY_SOMETHING").unwrap_err();
        assert_eq!(err, ParseActionError::UnknownAction("BUY_SOMETHING".into()));
    }

    #[test]
    fn test_action_serde_matches_vocabulary() {
        let json = serde_json::to_string(&Action::OptionExpiration).unwrap();
        assert_eq!(json, "\"OPTIONEXPIRATION\"");
        let json = serde_json::to_string(&Action::BuyToClose).unwrap();
        assert_eq!(json, "\"BUY_TO_CLOSE\"");
    }

    #[test]
    fn test_side_classification() {
        assert_eq!(trade(Action::Buy, "1").side(), Some(Side::Buy));
        assert_eq!(trade(Action::Assignment, "1").side(), Some(Side::Buy));
        assert_eq!(trade(Action::BuyToClose, "1").side(), Some(Side::Buy));
        assert_eq!(trade(Action::Exercises, "1").side(), Some(Side::Sell));
        assert_eq!(trade(Action::SellToOpen, "1").side(), Some(Side::Sell));
        assert_eq!(trade(Action::Split, "1").side(), None);
        assert_eq!(trade(Action::Dividend, "1").side(), None);
    }

    #[test]
    fn test_expiration_sign_selects_side() {
        assert_eq!(trade(Action::OptionExpiration, "-1").side(), Some(Side::Sell));
        assert_eq!(trade(Action::OptionExpiration, "1").side(), Some(Side::Buy));
        assert_eq!(trade(Action::OptionExpiration, "0").side(), Some(Side::Buy));
    }

    #[test]
    fn test_default_multiplier() {
        let stock = trade(Action::Buy, "1");
        assert_eq!(stock.multiplier, d("1"));
        let option = Trade::new(
            "o1",
            AccountId::new("acct"),
            Symbol::new("XYZ   240119C00050000"),
            InstrumentType::Option,
            Action::BuyToOpen,
            d("1"),
            d("2"),
            TimeMs::new(1),
        );
        assert_eq!(option.multiplier, d("100"));
    }

    #[test]
    fn test_fingerprint_ignores_id() {
        let a = trade(Action::Buy, "5");
        let mut b = a.clone();
        b.id = "t2".to_string();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);

        let c = trade(Action::Buy, "6");
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
