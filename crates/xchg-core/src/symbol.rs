//! Exchange-agnostic instrument identity.
//!
//! A `Symbol` is a base/quote currency pair. It carries no venue-specific
//! naming; each venue adapter maps it to its own wire symbol through the
//! product catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Currency code (e.g. "BTC", "USDT").
///
/// Stored uppercase so lookups are case-insensitive at the edges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Tradable instrument identity: a base/quote currency pair.
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    base: Currency,
    quote: Currency,
}

impl Symbol {
    pub fn new(base: Currency, quote: Currency) -> Self {
        Self { base, quote }
    }

    pub fn base(&self) -> &Currency {
        &self.base
    }

    pub fn quote(&self) -> &Currency {
        &self.quote
    }

    /// Canonical string form, `BASE/QUOTE`.
    pub fn as_pair(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl FromStr for Symbol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidSymbol(s.to_string()))?;
        if base.is_empty() || quote.is_empty() {
            return Err(CoreError::InvalidSymbol(s.to_string()));
        }
        Ok(Self::new(Currency::new(base), Currency::new(quote)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_uppercased() {
        assert_eq!(Currency::new("btc").as_str(), "BTC");
    }

    #[test]
    fn test_symbol_display() {
        let symbol = Symbol::new(Currency::new("BTC"), Currency::new("USDT"));
        assert_eq!(symbol.to_string(), "BTC/USDT");
    }

    #[test]
    fn test_symbol_parse() {
        let symbol: Symbol = "eth/usd".parse().unwrap();
        assert_eq!(symbol.base().as_str(), "ETH");
        assert_eq!(symbol.quote().as_str(), "USD");
    }

    #[test]
    fn test_symbol_parse_rejects_malformed() {
        assert!("BTCUSDT".parse::<Symbol>().is_err());
        assert!("/USDT".parse::<Symbol>().is_err());
        assert!("BTC/".parse::<Symbol>().is_err());
    }
}
