//! Trading pairs and venue identifiers
//!
//! The pair universe is closed: three USD base pairs fed by venue trades,
//! and three RUB pairs derived from them via the fiat rate. Venues never
//! feed a derived pair directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A supported trading pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Pair {
    BtcUsd,
    EthUsd,
    XmrUsd,
    BtcRub,
    EthRub,
    XmrRub,
}

impl Pair {
    /// All supported pairs
    pub fn all() -> &'static [Pair] {
        &[
            Pair::BtcUsd,
            Pair::EthUsd,
            Pair::XmrUsd,
            Pair::BtcRub,
            Pair::EthRub,
            Pair::XmrRub,
        ]
    }

    /// The venue-fed USD pairs
    pub fn base_pairs() -> &'static [Pair] {
        &[Pair::BtcUsd, Pair::EthUsd, Pair::XmrUsd]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pair::BtcUsd => "btc-usd",
            Pair::EthUsd => "eth-usd",
            Pair::XmrUsd => "xmr-usd",
            Pair::BtcRub => "btc-rub",
            Pair::EthRub => "eth-rub",
            Pair::XmrRub => "xmr-rub",
        }
    }

    /// Whether this pair is computed from venue trades
    pub fn is_base(&self) -> bool {
        matches!(self, Pair::BtcUsd | Pair::EthUsd | Pair::XmrUsd)
    }

    /// The RUB pair derived from this base pair
    pub fn derived_rub(&self) -> Option<Pair> {
        match self {
            Pair::BtcUsd => Some(Pair::BtcRub),
            Pair::EthUsd => Some(Pair::EthRub),
            Pair::XmrUsd => Some(Pair::XmrRub),
            _ => None,
        }
    }

    /// The base pair a derived pair is computed from
    pub fn base_for(&self) -> Option<Pair> {
        match self {
            Pair::BtcRub => Some(Pair::BtcUsd),
            Pair::EthRub => Some(Pair::EthUsd),
            Pair::XmrRub => Some(Pair::XmrUsd),
            _ => None,
        }
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pair {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "btc-usd" => Ok(Pair::BtcUsd),
            "eth-usd" => Ok(Pair::EthUsd),
            "xmr-usd" => Ok(Pair::XmrUsd),
            "btc-rub" => Ok(Pair::BtcRub),
            "eth-rub" => Ok(Pair::EthRub),
            "xmr-rub" => Ok(Pair::XmrRub),
            other => Err(CoreError::invalid_pair(other)),
        }
    }
}

/// A supported trade venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Bybit,
    Coinbase,
    Kraken,
    Kucoin,
    Okx,
}

impl Venue {
    pub fn all() -> &'static [Venue] {
        &[
            Venue::Binance,
            Venue::Bybit,
            Venue::Coinbase,
            Venue::Kraken,
            Venue::Kucoin,
            Venue::Okx,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Bybit => "bybit",
            Venue::Coinbase => "coinbase",
            Venue::Kraken => "kraken",
            Venue::Kucoin => "kucoin",
            Venue::Okx => "okx",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binance" => Ok(Venue::Binance),
            "bybit" => Ok(Venue::Bybit),
            "coinbase" => Ok(Venue::Coinbase),
            "kraken" => Ok(Venue::Kraken),
            "kucoin" => Ok(Venue::Kucoin),
            "okx" => Ok(Venue::Okx),
            other => Err(CoreError::invalid_params(format!(
                "unknown venue: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_round_trip() {
        for pair in Pair::all() {
            assert_eq!(pair.as_str().parse::<Pair>().unwrap(), *pair);
        }
    }

    #[test]
    fn test_unknown_pair_rejected() {
        let err = "doge-usd".parse::<Pair>().unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::InvalidPair);
    }

    #[test]
    fn test_base_derived_mapping() {
        assert_eq!(Pair::BtcUsd.derived_rub(), Some(Pair::BtcRub));
        assert_eq!(Pair::BtcRub.base_for(), Some(Pair::BtcUsd));
        assert_eq!(Pair::BtcRub.derived_rub(), None);
        assert!(Pair::BtcUsd.is_base());
        assert!(!Pair::XmrRub.is_base());
    }

    #[test]
    fn test_pair_serde_kebab() {
        let json = serde_json::to_string(&Pair::BtcUsd).unwrap();
        assert_eq!(json, "\"btc-usd\"");
        let back: Pair = serde_json::from_str("\"xmr-rub\"").unwrap();
        assert_eq!(back, Pair::XmrRub);
    }
}
