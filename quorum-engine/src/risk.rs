//! Stop and take-profit placement.
//!
//! The policy is pluggable: the engine only asks for raw (pre-quantization)
//! stop and target prices given direction, reference price and regime.

use std::collections::HashMap;

use rust_decimal::Decimal;

use quorum_domain::{OrderSide, Regime, TickSize};

/// Raw exit prices proposed by a risk policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskTargets {
    pub stop: Decimal,
    pub take_profit: Decimal,
}

/// Regime-dependent stop / target placement.
pub trait RiskPolicy: Send + Sync {
    fn targets(&self, direction: OrderSide, price: Decimal, regime: Regime) -> RiskTargets;
}

/// Stop and target distances measured in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickDistances {
    pub stop_ticks: u32,
    pub take_ticks: u32,
}

impl TickDistances {
    /// Distances of `stop_ticks` and `take_ticks` from entry.
    pub const fn new(stop_ticks: u32, take_ticks: u32) -> Self {
        Self {
            stop_ticks,
            take_ticks,
        }
    }
}

/// Fixed tick distances per regime.
///
/// | Regime        | Stop | Take |
/// |---------------|------|------|
/// | Trending      | 8    | 25   |
/// | Ranging       | 5    | 8    |
/// | Volatile      | 15   | 30   |
/// | Undefined     | 10   | 20   |
#[derive(Debug, Clone)]
pub struct RegimeTargets {
    tick: TickSize,
    table: HashMap<Regime, TickDistances>,
    fallback: TickDistances,
}

impl RegimeTargets {
    /// Default distance table for the instrument tick.
    pub fn new(tick: TickSize) -> Self {
        let trending = TickDistances::new(8, 25);
        let table = HashMap::from([
            (Regime::TrendingUp, trending),
            (Regime::TrendingDown, trending),
            (Regime::Ranging, TickDistances::new(5, 8)),
            (Regime::Volatile, TickDistances::new(15, 30)),
        ]);

        Self {
            tick,
            table,
            fallback: TickDistances::new(10, 20),
        }
    }

    /// Override the distances for one regime.
    pub fn with_distances(mut self, regime: Regime, distances: TickDistances) -> Self {
        if regime == Regime::Undefined {
            self.fallback = distances;
        } else {
            self.table.insert(regime, distances);
        }
        self
    }

    /// Distances for `regime`, falling back to the undefined-regime pair.
    pub fn distances(&self, regime: Regime) -> TickDistances {
        self.table.get(&regime).copied().unwrap_or(self.fallback)
    }
}

impl RiskPolicy for RegimeTargets {
    fn targets(&self, direction: OrderSide, price: Decimal, regime: Regime) -> RiskTargets {
        let d = self.distances(regime);
        let stop_dist = self.tick.ticks(d.stop_ticks);
        let take_dist = self.tick.ticks(d.take_ticks);

        match direction {
            OrderSide::Buy => RiskTargets {
                stop: price - stop_dist,
                take_profit: price + take_dist,
            },
            OrderSide::Sell => RiskTargets {
                stop: price + stop_dist,
                take_profit: price - take_dist,
            },
        }
    }
}
