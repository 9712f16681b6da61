//! OCC option symbol parsing (`ROOT  YYMMDDCSSSSSSSS`).

use crate::domain::{Decimal, InstrumentType, Symbol};
use chrono::NaiveDate;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Call,
    Put,
}

/// Parsed components of an OCC-style option symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccSymbol {
    pub root: String,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub strike: Decimal,
}

const OCC_TAIL_LEN: usize = 15;

impl OccSymbol {
    /// Parse an OCC symbol. The root may be space-padded to six characters
    /// or written without padding.
    pub fn parse(symbol: &str) -> Option<Self> {
        let s = symbol.trim();
        if !s.is_ascii() || s.len() <= OCC_TAIL_LEN {
            return None;
        }
        let (root, tail) = s.split_at(s.len() - OCC_TAIL_LEN);
        let root = root.trim();
        if root.is_empty() || root.len() > 6 {
            return None;
        }

        let digits = |r: std::ops::Range<usize>| -> Option<u32> {
            let part = &tail[r];
            if part.bytes().all(|b| b.is_ascii_digit()) {
                part.parse().ok()
            } else {
                None
            }
        };

        let yy = digits(0..2)?;
        let mm = digits(2..4)?;
        let dd = digits(4..6)?;
        let expiration = NaiveDate::from_ymd_opt(2000 + yy as i32, mm, dd)?;

        let option_type = match &tail[6..7] {
            "C" => OptionType::Call,
            "P" => OptionType::Put,
            _ => return None,
        };

        let strike_thousandths = digits(7..15)?;
        let strike = Decimal::new(RustDecimal::new(i64::from(strike_thousandths), 3));

        Some(OccSymbol {
            root: root.to_string(),
            expiration,
            option_type,
            strike,
        })
    }
}

/// Underlying symbol used to group strategy legs: the OCC root for options,
/// the ticker itself for stock.
pub fn underlying_of(symbol: &Symbol, instrument_type: InstrumentType) -> String {
    match instrument_type {
        InstrumentType::Option => OccSymbol::parse(symbol.as_str())
            .map(|occ| occ.root)
            .unwrap_or_else(|| symbol.as_str().trim().to_string()),
        InstrumentType::Stock => symbol.as_str().trim().to_string(),
    }
}
