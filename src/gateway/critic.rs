//! Confidence gating for scaffold plans.
//!
//! A critic call scores a proposed plan on a fixed-weighted rubric;
//! plans below the threshold are rejected and re-requested with the
//! critique attached, up to the job's attempt bound. The gate is
//! optional and applies to scaffold only.

use serde::{Deserialize, Serialize};

/// Rubric weights. Fixed by contract; not configurable per call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriticWeights {
    pub completeness: f32,
    pub feasibility: f32,
    pub edge_cases: f32,
    pub efficiency: f32,
}

/// completeness 0.3, feasibility 0.3, edge-case handling 0.2,
/// efficiency/quality 0.2.
pub const DEFAULT_WEIGHTS: CriticWeights = CriticWeights {
    completeness: 0.3,
    feasibility: 0.3,
    edge_cases: 0.2,
    efficiency: 0.2,
};

/// Minimum weighted score a plan must reach.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// The critic lane's structured verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticVerdict {
    pub completeness: f32,
    pub feasibility: f32,
    pub edge_cases: f32,
    pub efficiency: f32,
    #[serde(default)]
    pub critique: String,
}

impl CriticVerdict {
    /// Weighted rubric score in `[0, 1]`.
    #[must_use]
    pub fn weighted_score(&self, weights: &CriticWeights) -> f32 {
        self.completeness * weights.completeness
            + self.feasibility * weights.feasibility
            + self.edge_cases * weights.edge_cases
            + self.efficiency * weights.efficiency
    }

    /// Whether the plan clears the gate.
    #[must_use]
    pub fn passes(&self, threshold: f32) -> bool {
        self.weighted_score(&DEFAULT_WEIGHTS) >= threshold
    }
}
