//! ConflictResolver
//!
//! Applies the configured resolution strategy to the consensus score of a
//! conflicting ensemble and records the pre/post scores on the conflict.
//! A numeric strategy that cannot move the score degrades to review-flag.

use crate::types::{ConflictRecord, ResolutionStrategy};
use tracing::debug;

/// Smallest score change that counts as a resolution
const MIN_EFFECTIVE_CHANGE: f64 = 1e-9;

/// Result of resolving (or not resolving) one request's conflict
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub score: f64,
    pub conflict: Option<ConflictRecord>,
    /// Staff review forced by review-flag semantics
    pub forces_review: bool,
}

pub struct ConflictResolver {
    strategy: ResolutionStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    /// Resolve `score` against `conflict`; no-op without a conflict
    pub fn resolve(&self, score: f64, conflict: Option<ConflictRecord>) -> Resolution {
        let Some(mut record) = conflict else {
            return Resolution {
                score,
                conflict: None,
                forces_review: false,
            };
        };

        let values = &record.disagreeing_confidences;
        let candidate = match self.strategy {
            ResolutionStrategy::Conservative => values.iter().copied().reduce(f64::max),
            ResolutionStrategy::Optimistic => values.iter().copied().reduce(f64::min),
            ResolutionStrategy::Mean => (!values.is_empty())
                .then(|| values.iter().sum::<f64>() / values.len() as f64),
            ResolutionStrategy::ReviewFlag => None,
        };

        let (resolved, applied, forces_review) = match candidate.map(|v| v.clamp(0.0, 1.0)) {
            Some(value) if (value - score).abs() >= MIN_EFFECTIVE_CHANGE => {
                (value, self.strategy, false)
            }
            _ => {
                if self.strategy != ResolutionStrategy::ReviewFlag {
                    debug!(
                        strategy = ?self.strategy,
                        conflict_type = ?record.conflict_type,
                        "Conflict unresolvable by strategy, flagging for review"
                    );
                }
                (score, ResolutionStrategy::ReviewFlag, true)
            }
        };

        record.resolution_strategy = Some(applied);
        record.pre_resolution_score = score;
        record.post_resolution_score = resolved;

        Resolution {
            score: resolved,
            conflict: Some(record),
            forces_review,
        }
    }
}

/// Attach a conflict without resolving it (pre = post, no strategy)
pub fn attach_unresolved(score: f64, conflict: Option<ConflictRecord>) -> Option<ConflictRecord> {
    conflict.map(|mut record| {
        record.resolution_strategy = None;
        record.pre_resolution_score = score;
        record.post_resolution_score = score;
        record
    })
}
