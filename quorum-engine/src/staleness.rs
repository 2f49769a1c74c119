//! Frozen-feed detection.
//!
//! An upstream buffer that stops updating keeps producing snapshots with the
//! same top of book. Scorers happily emit confident opinions on such input,
//! so the engine refuses to decide once the price fields stop moving.

use chrono::{DateTime, Utc};
use serde::Serialize;

use quorum_domain::{FeatureSnapshot, Price};

/// Raised when the price fields repeat for too many consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticFeatureWarning {
    /// Consecutive snapshots with identical bid/ask/last
    pub repeated: usize,
    /// The frozen last price
    pub last_price: Price,
    /// Timestamp of the snapshot that tripped the guard
    pub at: DateTime<Utc>,
}

/// Result of checking one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotCheck {
    /// Prices moved recently enough
    Fresh,
    /// Prices frozen
    Stale(StaticFeatureWarning),
    /// Timestamp did not advance; snapshot ignored
    NonMonotonic {
        previous: DateTime<Utc>,
        received: DateTime<Utc>,
    },
}

/// Tracks the run length of identical price fields.
#[derive(Debug, Clone)]
pub struct StaleFeatureGuard {
    limit: usize,
    last_fields: Option<(Price, Price, Price)>,
    run_length: usize,
    last_timestamp: Option<DateTime<Utc>>,
}

impl StaleFeatureGuard {
    /// `limit` identical snapshots in a row count as stale (minimum 2).
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(2),
            last_fields: None,
            run_length: 0,
            last_timestamp: None,
        }
    }

    /// Consecutive identical snapshots tolerated before warning.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Compare `snapshot` with the previous one and update the run counter.
    pub fn observe(&mut self, snapshot: &FeatureSnapshot) -> SnapshotCheck {
        if let Some(previous) = self.last_timestamp {
            if snapshot.timestamp <= previous {
                return SnapshotCheck::NonMonotonic {
                    previous,
                    received: snapshot.timestamp,
                };
            }
        }
        self.last_timestamp = Some(snapshot.timestamp);

        let fields = snapshot.price_fields();
        if self.last_fields == Some(fields) {
            self.run_length += 1;
        } else {
            self.last_fields = Some(fields);
            self.run_length = 1;
        }

        if self.run_length >= self.limit {
            SnapshotCheck::Stale(StaticFeatureWarning {
                repeated: self.run_length,
                last_price: snapshot.last_price,
                at: snapshot.timestamp,
            })
        } else {
            SnapshotCheck::Fresh
        }
    }
}

impl Default for StaleFeatureGuard {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use quorum_domain::Regime;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snap(at: DateTime<Utc>, last: Decimal) -> FeatureSnapshot {
        FeatureSnapshot {
            timestamp: at,
            features: vec![],
            best_bid: Price::new(last - dec!(0.5)).unwrap(),
            best_ask: Price::new(last).unwrap(),
            last_price: Price::new(last).unwrap(),
            regime: Regime::Undefined,
        }
    }

    #[test]
    fn test_fifth_identical_snapshot_is_stale() {
        let start = Utc::now();
        let mut guard = StaleFeatureGuard::default();

        for i in 0..4 {
            let check = guard.observe(&snap(start + Duration::seconds(i), dec!(5000)));
            assert_eq!(check, SnapshotCheck::Fresh);
        }

        match guard.observe(&snap(start + Duration::seconds(4), dec!(5000))) {
            SnapshotCheck::Stale(w) => assert_eq!(w.repeated, 5),
            other => panic!("Expected stale, got {:?}", other),
        }

        // Still frozen
        assert!(matches!(
            guard.observe(&snap(start + Duration::seconds(5), dec!(5000))),
            SnapshotCheck::Stale(_)
        ));

        // A price move resets the run
        assert_eq!(
            guard.observe(&snap(start + Duration::seconds(6), dec!(5000.5))),
            SnapshotCheck::Fresh
        );
    }

    #[test]
    fn test_non_monotonic_snapshot_ignored() {
        let start = Utc::now();
        let mut guard = StaleFeatureGuard::default();

        guard.observe(&snap(start, dec!(5000)));
        let check = guard.observe(&snap(start, dec!(5001)));
        assert!(matches!(check, SnapshotCheck::NonMonotonic { .. }));

        let check = guard.observe(&snap(start - Duration::seconds(1), dec!(5001)));
        assert!(matches!(check, SnapshotCheck::NonMonotonic { .. }));
    }
}
