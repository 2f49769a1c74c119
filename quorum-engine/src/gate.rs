//! Regime gate.
//!
//! Blocks counter-trend entries and raises the bar for a decision in
//! choppy or volatile markets.

use std::collections::HashMap;

use quorum_domain::{OrderSide, Regime};

/// Per-regime admission rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeRule {
    pub allow_buy: bool,
    pub allow_sell: bool,
    /// Minimum decision strength in [0, 1]
    pub min_strength: f64,
}

impl RegimeRule {
    /// Rule admitting both directions at any strength.
    pub const fn open() -> Self {
        Self {
            allow_buy: true,
            allow_sell: true,
            min_strength: 0.0,
        }
    }
}

/// Why the gate refused a decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateBlock {
    /// Direction not allowed in this regime
    DirectionBlocked,
    /// Strength below the regime's floor
    TooWeak { required: f64 },
}

/// Per-regime filter applied after the consensus decision.
#[derive(Debug, Clone)]
pub struct RegimeGate {
    enabled: bool,
    rules: HashMap<Regime, RegimeRule>,
}

impl RegimeGate {
    /// Gate that admits everything
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            rules: HashMap::new(),
        }
    }

    /// Set the rule for one regime.
    pub fn with_rule(mut self, regime: Regime, rule: RegimeRule) -> Self {
        self.rules.insert(regime, rule);
        self
    }

    /// Whether rules are applied at all.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Rule for `regime`; unlisted regimes are open.
    pub fn rule(&self, regime: Regime) -> RegimeRule {
        self.rules.get(&regime).copied().unwrap_or(RegimeRule::open())
    }

    /// Admit or block a decision of `direction` and `strength` in `regime`.
    pub fn check(&self, direction: OrderSide, strength: f64, regime: Regime) -> Result<(), GateBlock> {
        if !self.enabled {
            return Ok(());
        }
        let rule = self.rule(regime);
        let allowed = match direction {
            OrderSide::Buy => rule.allow_buy,
            OrderSide::Sell => rule.allow_sell,
        };
        if !allowed {
            return Err(GateBlock::DirectionBlocked);
        }
        if strength < rule.min_strength {
            return Err(GateBlock::TooWeak {
                required: rule.min_strength,
            });
        }
        Ok(())
    }
}

impl Default for RegimeGate {
    fn default() -> Self {
        let rules = HashMap::from([
            (
                Regime::TrendingUp,
                RegimeRule {
                    allow_buy: true,
                    allow_sell: false,
                    min_strength: 0.55,
                },
            ),
            (
                Regime::TrendingDown,
                RegimeRule {
                    allow_buy: false,
                    allow_sell: true,
                    min_strength: 0.55,
                },
            ),
            (
                Regime::Ranging,
                RegimeRule {
                    allow_buy: true,
                    allow_sell: true,
                    min_strength: 0.65,
                },
            ),
            (
                Regime::Volatile,
                RegimeRule {
                    allow_buy: true,
                    allow_sell: true,
                    min_strength: 0.70,
                },
            ),
        ]);

        Self {
            enabled: true,
            rules,
        }
    }
}
