//! Volume-weighted average price core
//!
//! Pure computation over a window of trades. Commutative over the input
//! set; zero total volume yields no result rather than a division by zero.

use rust_decimal::Decimal;
use std::collections::BTreeSet;

use priceverse_core::Trade;

/// Result of aggregating one pair's window
#[derive(Debug, Clone, PartialEq)]
pub struct VwapResult {
    pub price: Decimal,
    /// Distinct contributing venue names, sorted
    pub sources: Vec<String>,
    pub total_volume: Decimal,
}

/// Compute `sum(price_i * volume_i) / sum(volume_i)` over the window.
///
/// Returns `None` when the window is empty or total volume is zero —
/// neither is an error, the tick simply emits nothing for the pair.
pub fn compute_vwap(trades: &[Trade]) -> Option<VwapResult> {
    if trades.is_empty() {
        return None;
    }

    let mut weighted_sum = Decimal::ZERO;
    let mut total_volume = Decimal::ZERO;
    let mut sources = BTreeSet::new();

    for trade in trades {
        weighted_sum += trade.price * trade.volume;
        total_volume += trade.volume;
        sources.insert(trade.venue.as_str().to_string());
    }

    if total_volume == Decimal::ZERO {
        return None;
    }

    Some(VwapResult {
        price: weighted_sum / total_volume,
        sources: sources.into_iter().collect(),
        total_volume,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use priceverse_core::{Pair, Venue};
    use rust_decimal_macros::dec;
    use std::str::FromStr;

    fn trade(venue: Venue, price: Decimal, volume: Decimal) -> Trade {
        Trade {
            venue,
            pair: Pair::BtcUsd,
            price,
            volume,
            event_time_ms: 0,
            venue_trade_id: String::new(),
        }
    }

    #[test]
    fn test_single_trade() {
        let trades = vec![trade(Venue::Binance, dec!(45000), dec!(1))];
        let result = compute_vwap(&trades).unwrap();
        assert_eq!(result.price, dec!(45000));
        assert_eq!(result.sources, vec!["binance"]);
        assert_eq!(result.total_volume, dec!(1));
    }

    #[test]
    fn test_multi_trade_weighted() {
        let trades = vec![
            trade(Venue::Binance, dec!(45000), dec!(1)),
            trade(Venue::Kraken, dec!(45100), dec!(2)),
            trade(Venue::Coinbase, dec!(44900), dec!(1.5)),
        ];
        let result = compute_vwap(&trades).unwrap();
        // (45000 + 90200 + 67350) / 4.5
        let expected = Decimal::from_str("45011.111111111111111111111111").unwrap();
        assert!((result.price - expected).abs() < dec!(0.00000001));
        assert_eq!(result.sources, vec!["binance", "coinbase", "kraken"]);
        assert_eq!(result.total_volume, dec!(4.5));
    }

    #[test]
    fn test_source_dedup_same_venue() {
        let trades = vec![
            trade(Venue::Binance, dec!(100), dec!(1)),
            trade(Venue::Binance, dec!(102), dec!(1)),
        ];
        let result = compute_vwap(&trades).unwrap();
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.price, dec!(101));
    }

    #[test]
    fn test_zero_volume_trade_harmless() {
        let trades = vec![
            trade(Venue::Binance, dec!(100), dec!(0)),
            trade(Venue::Kraken, dec!(200), dec!(2)),
        ];
        let result = compute_vwap(&trades).unwrap();
        assert_eq!(result.price, dec!(200));
        assert_eq!(result.total_volume, dec!(2));
        // Zero-volume trade still counts as a source
        assert_eq!(result.sources.len(), 2);
    }

    #[test]
    fn test_all_zero_volume_emits_nothing() {
        let trades = vec![
            trade(Venue::Binance, dec!(100), dec!(0)),
            trade(Venue::Kraken, dec!(200), dec!(0)),
        ];
        assert!(compute_vwap(&trades).is_none());
    }

    #[test]
    fn test_empty_window_emits_nothing() {
        assert!(compute_vwap(&[]).is_none());
    }

    #[test]
    fn test_purity_and_commutativity() {
        let mut trades = vec![
            trade(Venue::Binance, dec!(45000), dec!(1)),
            trade(Venue::Kraken, dec!(45100), dec!(2)),
            trade(Venue::Coinbase, dec!(44900), dec!(1.5)),
        ];
        let before = compute_vwap(&trades).unwrap();
        trades.reverse();
        let after = compute_vwap(&trades).unwrap();
        assert_eq!(before, after);
    }
}
