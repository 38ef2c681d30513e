use crate::error::{ReconciliationError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Absolute plus relative tolerance for a numeric field comparison.
/// A delta is a break only when it exceeds BOTH thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToleranceConfig {
    /// Absolute tolerance in currency units.
    pub absolute: f64,
    /// Relative tolerance as a fraction of the larger magnitude (0.0001 = 0.01%).
    pub relative: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            absolute: 0.01,
            relative: 0.0001,
        }
    }
}

impl ToleranceConfig {
    /// True when the two values agree within tolerance.
    pub fn within(&self, a: f64, b: f64) -> bool {
        let diff = (a - b).abs();
        let scale = a.abs().max(b.abs());
        diff <= self.absolute || diff <= scale * self.relative
    }
}

/// Weighting of break findings in the reconciliation score. Score is
/// `10 - min(10, sum(type_weight * severity_points))`, clamped to [0, 10].
///
/// These defaults are a starting configuration, not a mandated formula;
/// operators tune them alongside the tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub amount: f64,
    pub tax: f64,
    pub date: f64,
    pub currency: f64,
    pub duplicate: f64,
    pub missing: f64,
    /// Points per severity class: [low, medium, high, critical].
    pub severity_points: [f64; 4],
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            amount: 2.0,
            tax: 1.5,
            date: 1.0,
            currency: 1.5,
            duplicate: 1.5,
            missing: 10.0,
            severity_points: [1.0, 2.0, 3.0, 4.0],
        }
    }
}

/// Operator-facing configuration for the whole pipeline. Constructed once
/// and passed in; nothing in the pipeline reads ambient environment state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub amount_tolerance: ToleranceConfig,
    pub tax_tolerance: ToleranceConfig,
    pub score_weights: ScoreWeights,

    /// Maximum findings per external classification call.
    pub batch_size: usize,
    /// Concurrent in-flight classification calls. Purely a throughput knob;
    /// results are reassembled in match order regardless.
    pub parallelism: usize,
    /// Timeout for a single external call; expiry degrades that batch.
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,
    /// How long a completed analysis stays servable from the cache.
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,

    /// Rows with total impact above this are "high impact" in the summary.
    pub high_impact_threshold: f64,
    /// Impact above the first bound is material, above the second highly material.
    pub materiality_bounds: (f64, f64),
    /// Root-cause frequency ratios at which systemic risk is graded
    /// moderate and high respectively.
    pub systemic_risk_thresholds: (f64, f64),
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: ToleranceConfig::default(),
            tax_tolerance: ToleranceConfig::default(),
            score_weights: ScoreWeights::default(),
            batch_size: 5,
            parallelism: 4,
            call_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(300),
            high_impact_threshold: 1_000.0,
            materiality_bounds: (1_000.0, 100_000.0),
            systemic_risk_thresholds: (0.5, 0.7),
        }
    }
}

impl ReconciliationConfig {
    pub fn validate(&self) -> Result<()> {
        for tol in [&self.amount_tolerance, &self.tax_tolerance] {
            if tol.absolute < 0.0 {
                return Err(ReconciliationError::InvalidTolerance(tol.absolute));
            }
            if tol.relative < 0.0 {
                return Err(ReconciliationError::InvalidTolerance(tol.relative));
            }
        }

        let w = &self.score_weights;
        for weight in [w.amount, w.tax, w.date, w.currency, w.duplicate, w.missing]
            .into_iter()
            .chain(w.severity_points)
        {
            if weight < 0.0 {
                return Err(ReconciliationError::InvalidScoreWeight(weight));
            }
        }

        if self.batch_size == 0 {
            return Err(ReconciliationError::InvalidConfig {
                field: "batch_size".to_string(),
                details: "must be at least 1".to_string(),
            });
        }
        if self.parallelism == 0 {
            return Err(ReconciliationError::InvalidConfig {
                field: "parallelism".to_string(),
                details: "must be at least 1".to_string(),
            });
        }

        let (moderate, high) = self.systemic_risk_thresholds;
        if !(0.0..=1.0).contains(&moderate) || !(0.0..=1.0).contains(&high) || moderate > high {
            return Err(ReconciliationError::InvalidConfig {
                field: "systemic_risk_thresholds".to_string(),
                details: format!("expected 0.0 <= moderate <= high <= 1.0, got ({moderate}, {high})"),
            });
        }

        let (material, highly) = self.materiality_bounds;
        if material < 0.0 || highly < material {
            return Err(ReconciliationError::InvalidConfig {
                field: "materiality_bounds".to_string(),
                details: format!("expected 0.0 <= material <= highly_material, got ({material}, {highly})"),
            });
        }

        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
