//! Crisis threshold tables and the CrisisThresholdManager
//!
//! A ThresholdSet maps the consensus score onto the ordered levels
//! `none < low < medium < high < critical`. `none` is pinned at 0.0; the
//! other four lower bounds must be strictly ascending inside (0.0, 1.0].
//!
//! Readers never see a table mid-update: the manager works on a
//! [`ThresholdSnapshot`] (an `Arc` of the whole table map plus the
//! learning generation it was taken at).

use crate::types::{CrisisLevel, ReviewReason};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Threshold sets keyed by mode name
pub type ThresholdTables = BTreeMap<String, ThresholdSet>;

/// Threshold set validation failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ThresholdConfigError {
    /// A bound is NaN/infinite or outside [0.0, 1.0]
    #[error("bound for '{level}' is {value}, expected a finite value in [0.0, 1.0]")]
    OutOfRange { level: CrisisLevel, value: f64 },

    /// Two adjacent bounds are not strictly ascending
    #[error("bound for '{upper}' ({upper_value}) must be greater than bound for '{lower}' ({lower_value})")]
    NotAscending {
        lower: CrisisLevel,
        lower_value: f64,
        upper: CrisisLevel,
        upper_value: f64,
    },

    /// A bound lies outside the range learning may move thresholds in
    #[error("bound for '{level}' is {value}, outside the sensitivity bounds [{min}, {max}]")]
    OutsideSensitivityBounds {
        level: CrisisLevel,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Staff review sub-table is inconsistent
    #[error("invalid staff_review configuration: {0}")]
    InvalidStaffReview(String),
}

/// Staff-review rules attached to a ThresholdSet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffReviewConfig {
    /// Levels that always need a human (high/critical always do regardless)
    #[serde(default = "default_always_review_levels")]
    pub always_review_levels: Vec<CrisisLevel>,
    /// Distance from any bound that counts as borderline
    #[serde(default = "default_borderline_margin")]
    pub borderline_margin: f64,
    /// Review whenever the ensemble conflicted
    #[serde(default = "default_review_on_disagreement")]
    pub review_on_disagreement: bool,
    /// Below this decision confidence the system does not act autonomously
    #[serde(default = "default_min_autonomous_confidence")]
    pub min_autonomous_confidence: f64,
}

fn default_always_review_levels() -> Vec<CrisisLevel> {
    vec![CrisisLevel::High, CrisisLevel::Critical]
}

fn default_borderline_margin() -> f64 {
    0.05
}

fn default_review_on_disagreement() -> bool {
    true
}

fn default_min_autonomous_confidence() -> f64 {
    0.5
}

impl Default for StaffReviewConfig {
    fn default() -> Self {
        Self {
            always_review_levels: default_always_review_levels(),
            borderline_margin: default_borderline_margin(),
            review_on_disagreement: default_review_on_disagreement(),
            min_autonomous_confidence: default_min_autonomous_confidence(),
        }
    }
}

/// Lower bounds per crisis level plus staff-review rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSet {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
    #[serde(default)]
    pub staff_review: StaffReviewConfig,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self::with_bounds(0.15, 0.35, 0.60, 0.80)
    }
}

impl ThresholdSet {
    /// Set with default staff-review rules
    pub fn with_bounds(low: f64, medium: f64, high: f64, critical: f64) -> Self {
        Self {
            low,
            medium,
            high,
            critical,
            staff_review: StaffReviewConfig::default(),
        }
    }

    /// Lower bound of `level` (`none` is always 0.0)
    pub fn bound(&self, level: CrisisLevel) -> f64 {
        match level {
            CrisisLevel::None => 0.0,
            CrisisLevel::Low => self.low,
            CrisisLevel::Medium => self.medium,
            CrisisLevel::High => self.high,
            CrisisLevel::Critical => self.critical,
        }
    }

    /// Copy of this set with one bound replaced (`none` is not adjustable)
    pub fn with_bound(&self, level: CrisisLevel, value: f64) -> Self {
        let mut next = self.clone();
        match level {
            CrisisLevel::None => {}
            CrisisLevel::Low => next.low = value,
            CrisisLevel::Medium => next.medium = value,
            CrisisLevel::High => next.high = value,
            CrisisLevel::Critical => next.critical = value,
        }
        next
    }

    /// Check the strict-ascending invariant and staff-review sanity
    pub fn validate(&self) -> Result<(), ThresholdConfigError> {
        for level in CrisisLevel::BOUNDED {
            let value = self.bound(level);
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ThresholdConfigError::OutOfRange { level, value });
            }
        }

        for pair in CrisisLevel::ALL.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            let (lower_value, upper_value) = (self.bound(lower), self.bound(upper));
            if upper_value <= lower_value {
                return Err(ThresholdConfigError::NotAscending {
                    lower,
                    lower_value,
                    upper,
                    upper_value,
                });
            }
        }

        let review = &self.staff_review;
        if !review.borderline_margin.is_finite() || !(0.0..=0.5).contains(&review.borderline_margin) {
            return Err(ThresholdConfigError::InvalidStaffReview(format!(
                "borderline_margin {} outside [0.0, 0.5]",
                review.borderline_margin
            )));
        }
        if !review.min_autonomous_confidence.is_finite()
            || !(0.0..=1.0).contains(&review.min_autonomous_confidence)
        {
            return Err(ThresholdConfigError::InvalidStaffReview(format!(
                "min_autonomous_confidence {} outside [0.0, 1.0]",
                review.min_autonomous_confidence
            )));
        }

        Ok(())
    }

    /// Walk from `critical` down; first level whose bound is `<= score`
    pub fn level_for(&self, score: f64) -> CrisisLevel {
        CrisisLevel::BOUNDED
            .iter()
            .rev()
            .copied()
            .find(|&level| self.bound(level) <= score)
            .unwrap_or(CrisisLevel::None)
    }

    /// Every staff-review rule that fires for this decision
    pub fn review_reasons(
        &self,
        level: CrisisLevel,
        score: f64,
        conflict_present: bool,
        decision_confidence: f64,
    ) -> Vec<ReviewReason> {
        let review = &self.staff_review;
        let mut reasons = Vec::new();

        if level >= CrisisLevel::High {
            reasons.push(ReviewReason::HighSeverity);
        } else if review.always_review_levels.contains(&level) {
            reasons.push(ReviewReason::AlwaysReviewLevel);
        }

        let borderline = CrisisLevel::BOUNDED
            .iter()
            .any(|&l| (score - self.bound(l)).abs() <= review.borderline_margin);
        if borderline {
            reasons.push(ReviewReason::Borderline);
        }

        if conflict_present && review.review_on_disagreement {
            reasons.push(ReviewReason::Conflict);
        }

        if decision_confidence < review.min_autonomous_confidence {
            reasons.push(ReviewReason::LowConfidence);
        }

        reasons
    }

    /// Sum of the four bounds; lower means the set flags earlier
    pub fn sensitivity_rank(&self) -> f64 {
        CrisisLevel::BOUNDED.iter().map(|&l| self.bound(l)).sum()
    }
}

/// Consistent, immutable view of all threshold tables
#[derive(Debug, Clone)]
pub struct ThresholdSnapshot {
    tables: Arc<ThresholdTables>,
    generation: u64,
}

impl ThresholdSnapshot {
    pub fn new(tables: Arc<ThresholdTables>, generation: u64) -> Self {
        Self { tables, generation }
    }

    /// Learning generation this snapshot was taken at
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tables(&self) -> &ThresholdTables {
        &self.tables
    }

    pub fn get(&self, mode: &str) -> Option<&ThresholdSet> {
        self.tables.get(mode)
    }

    /// Known set that flags earliest (ties broken by mode name)
    pub fn most_conservative(&self) -> Option<(&str, &ThresholdSet)> {
        self.tables
            .iter()
            .min_by(|(a_name, a), (b_name, b)| {
                a.sensitivity_rank()
                    .total_cmp(&b.sensitivity_rank())
                    .then_with(|| a_name.cmp(b_name))
            })
            .map(|(name, set)| (name.as_str(), set))
    }
}

/// Threshold set picked for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedThresholds {
    /// Mode whose table is used
    pub mode: String,
    pub set: ThresholdSet,
    /// True when the requested mode was unknown
    pub fell_back: bool,
}

/// Maps consensus scores to crisis levels and staff-review decisions
pub struct CrisisThresholdManager {
    snapshot: ThresholdSnapshot,
}

impl CrisisThresholdManager {
    pub fn new(snapshot: ThresholdSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &ThresholdSnapshot {
        &self.snapshot
    }

    /// Table for `mode`, or the most conservative known table if unknown
    pub fn resolve(&self, mode: &str) -> ResolvedThresholds {
        if let Some(set) = self.snapshot.get(mode) {
            return ResolvedThresholds {
                mode: mode.to_string(),
                set: set.clone(),
                fell_back: false,
            };
        }

        match self.snapshot.most_conservative() {
            Some((name, set)) => {
                warn!(
                    requested_mode = mode,
                    fallback_mode = name,
                    "Unknown threshold mode, using most conservative table"
                );
                ResolvedThresholds {
                    mode: name.to_string(),
                    set: set.clone(),
                    fell_back: true,
                }
            }
            None => {
                warn!(requested_mode = mode, "No threshold tables loaded, using built-in default");
                ResolvedThresholds {
                    mode: mode.to_string(),
                    set: ThresholdSet::default(),
                    fell_back: true,
                }
            }
        }
    }

    pub fn level_for(&self, score: f64, mode: &str) -> CrisisLevel {
        self.resolve(mode).set.level_for(score)
    }

    /// Staff-review rules of `mode`'s table that fire; review is required when non-empty
    pub fn review_reasons(
        &self,
        level: CrisisLevel,
        score: f64,
        conflict_present: bool,
        decision_confidence: f64,
        mode: &str,
    ) -> Vec<ReviewReason> {
        self.resolve(mode)
            .set
            .review_reasons(level, score, conflict_present, decision_confidence)
    }
}
