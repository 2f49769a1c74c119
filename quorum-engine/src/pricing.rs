//! Intent price construction.
//!
//! Raw risk targets are quantized to the tick grid and then corrected so the
//! direction ordering always holds. An intent leaving this module is valid or
//! not produced at all.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::warn;

use quorum_domain::{Confidence, OrderSide, Price, Regime, TickSize, TradingIntent};

use crate::error::EngineResult;
use crate::risk::RiskPolicy;

/// Quantized prices after correction, plus whether any correction applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BracketPrices {
    pub entry: Decimal,
    pub stop: Decimal,
    pub take_profit: Decimal,
    pub corrected: bool,
}

/// Quantize and repair raw prices for `direction`.
///
/// Inverted stop/target pairs are swapped; a single leg on the wrong side of
/// entry is mirrored across it, keeping its distance (at least one tick).
pub fn correct_prices(
    direction: OrderSide,
    entry: Decimal,
    stop: Decimal,
    take_profit: Decimal,
    tick: TickSize,
) -> BracketPrices {
    let entry = tick.quantize(entry);
    let mut stop = tick.quantize(stop);
    let mut take = tick.quantize(take_profit);
    let mut corrected = false;

    // For a Buy the stop belongs below entry; for a Sell above.
    let stop_below = direction == OrderSide::Buy;

    let stop_wrong = |s: Decimal| if stop_below { s >= entry } else { s <= entry };
    let take_wrong = |t: Decimal| if stop_below { t <= entry } else { t >= entry };

    if stop_wrong(stop) && take_wrong(take) && stop != take {
        std::mem::swap(&mut stop, &mut take);
        corrected = true;
    }

    if stop_wrong(stop) {
        stop = mirror(entry, stop, stop_below, tick);
        corrected = true;
    }
    if take_wrong(take) {
        take = mirror(entry, take, !stop_below, tick);
        corrected = true;
    }

    BracketPrices {
        entry,
        stop,
        take_profit: take,
        corrected,
    }
}

fn mirror(entry: Decimal, leg: Decimal, below: bool, tick: TickSize) -> Decimal {
    let distance = (leg - entry).abs().max(tick.as_decimal());
    if below {
        entry - distance
    } else {
        entry + distance
    }
}

/// Build a validated intent from a reference price and the risk policy.
///
/// # Errors
/// Fails only if the corrected prices are non-positive (reference price
/// within one stop distance of zero).
pub fn build_intent(
    direction: OrderSide,
    confidence: Confidence,
    reference_price: Decimal,
    regime: Regime,
    risk: &dyn RiskPolicy,
    tick: TickSize,
    generated_at: DateTime<Utc>,
) -> EngineResult<TradingIntent> {
    let raw = risk.targets(direction, reference_price, regime);
    let prices = correct_prices(direction, reference_price, raw.stop, raw.take_profit, tick);

    if prices.corrected {
        warn!(
            %direction,
            ?regime,
            raw_stop = %raw.stop,
            raw_take = %raw.take_profit,
            stop = %prices.stop,
            take = %prices.take_profit,
            "Risk targets violated price ordering, corrected"
        );
    }

    let intent = TradingIntent::new(
        direction,
        confidence,
        Price::new(prices.entry)?,
        Price::new(prices.stop)?,
        Price::new(prices.take_profit)?,
        generated_at,
    )?;
    Ok(intent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::{RegimeTargets, RiskTargets};
    use rust_decimal_macros::dec;

    struct InvertedPolicy;

    impl RiskPolicy for InvertedPolicy {
        fn targets(&self, direction: OrderSide, price: Decimal, _regime: Regime) -> RiskTargets {
            // Places both legs on the wrong side
            match direction {
                OrderSide::Buy => RiskTargets {
                    stop: price + dec!(3),
                    take_profit: price - dec!(6),
                },
                OrderSide::Sell => RiskTargets {
                    stop: price - dec!(3),
                    take_profit: price + dec!(6),
                },
            }
        }
    }

    #[test]
    fn test_quantizes_to_tick() {
        let p = correct_prices(
            OrderSide::Buy,
            dec!(5000.3),
            dec!(4996.2),
            dec!(5012.9),
            TickSize::default(),
        );
        assert_eq!(p.entry, dec!(5000.5));
        assert_eq!(p.stop, dec!(4996));
        assert_eq!(p.take_profit, dec!(5013));
        assert!(!p.corrected);
    }

    #[test]
    fn test_inverted_sell_targets_swapped() {
        let p = correct_prices(
            OrderSide::Sell,
            dec!(5000),
            dec!(4990),
            dec!(5010),
            TickSize::default(),
        );
        assert_eq!(p.stop, dec!(5010));
        assert_eq!(p.take_profit, dec!(4990));
        assert!(p.corrected);
    }

    #[test]
    fn test_single_leg_mirrored() {
        // Take collapses onto entry after rounding
        let p = correct_prices(
            OrderSide::Buy,
            dec!(5000),
            dec!(4995),
            dec!(5000.1),
            TickSize::default(),
        );
        assert_eq!(p.stop, dec!(4995));
        assert_eq!(p.take_profit, dec!(5000.5));
        assert!(p.corrected);
    }

    #[test]
    fn test_build_intent_never_invalid() {
        let tick = TickSize::default();
        for direction in [OrderSide::Buy, OrderSide::Sell] {
            let intent = build_intent(
                direction,
                Confidence::new(0.5).unwrap(),
                dec!(5000.2),
                Regime::Undefined,
                &InvertedPolicy,
                tick,
                Utc::now(),
            )
            .unwrap();
            assert!(intent.validate().is_ok());
        }
    }

    #[test]
    fn test_build_intent_with_regime_targets() {
        let tick = TickSize::default();
        let policy = RegimeTargets::new(tick);
        let intent = build_intent(
            OrderSide::Sell,
            Confidence::new(0.8).unwrap(),
            dec!(5000),
            Regime::Volatile,
            &policy,
            tick,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(intent.stop_price().as_decimal(), dec!(5007.5));
        assert_eq!(intent.take_profit_price().as_decimal(), dec!(4985));
    }

    #[test]
    fn test_non_positive_prices_rejected() {
        let tick = TickSize::default();
        let policy = RegimeTargets::new(tick);
        let result = build_intent(
            OrderSide::Buy,
            Confidence::new(0.8).unwrap(),
            dec!(2),
            Regime::Undefined,
            &policy,
            tick,
            Utc::now(),
        );
        assert!(result.is_err());
    }
}
