//! LearningSystem
//!
//! Turns reviewer corrections into small threshold moves:
//! - FALSE_POSITIVE raises the bound of the reported level (less sensitive)
//! - FALSE_NEGATIVE lowers the bound of the expected level (more sensitive)
//!
//! Every move is bounded three ways: the step is clamped to
//! `[min_confidence_adjustment, max_confidence_adjustment]`, the new value
//! to the intersection of `sensitivity_bounds` and `baseline ± max_drift`,
//! and the number of accepted moves to `max_adjustments_per_day` in any
//! rolling 24 hours.
//!
//! All state sits behind one `RwLock`. [`LearningSystem::record_feedback`]
//! checks and commits under the write lock (persistence included), so
//! concurrent feedback can never overshoot the daily cap and disk order
//! matches memory order. Readers take a [`ThresholdSnapshot`].

pub mod history;

pub use history::{AdjustmentHistory, AdjustmentRecord};

use crate::config::LearningConfig;
use crate::db;
use crate::thresholds::{ThresholdConfigError, ThresholdSet, ThresholdSnapshot, ThresholdTables};
use crate::types::{AdjustmentDirection, CrisisLevel, FeedbackEvent, FeedbackType};
use chrono::{DateTime, Duration, Utc};
use crisis_common::events::{CrisisEvent, EventBus, ThresholdChangeSource};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Feedback outcomes considered by the health score
const RECENT_OUTCOME_WINDOW: usize = 100;

/// Smallest bound movement that counts as an adjustment
const MIN_MOVEMENT: f64 = 1e-9;

fn daily_window() -> Duration {
    Duration::hours(24)
}

/// History rows kept in memory and on disk
///
/// Never fewer than the daily cap, since restore rebuilds the rolling
/// window from these rows.
fn retained_history(config: &LearningConfig) -> usize {
    config
        .history_capacity
        .max(config.max_adjustments_per_day as usize)
        .max(1)
}

/// Typed rejection; nothing was mutated
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LearningRejection {
    #[error("learning is disabled")]
    Disabled,

    #[error("daily adjustment limit of {limit} reached")]
    LimitExceeded {
        limit: u32,
        /// Oldest accepted adjustment still inside the rolling window
        window_start: Option<DateTime<Utc>>,
    },

    #[error("bound for '{level}' in mode '{mode}' cannot move past {value} (allowed [{min}, {max}])")]
    BoundsExceeded {
        mode: String,
        level: CrisisLevel,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("adjustment would break threshold ordering: {0}")]
    OrderingViolation(ThresholdConfigError),

    #[error("crisis level '{0}' has no adjustable threshold")]
    NotAdjustable(CrisisLevel),

    #[error("unknown threshold mode '{0}'")]
    UnknownMode(String),

    #[error("invalid feedback: {0}")]
    InvalidFeedback(String),
}

impl LearningRejection {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Disabled => "LEARNING_DISABLED",
            Self::LimitExceeded { .. } => "LEARNING_LIMIT_EXCEEDED",
            Self::BoundsExceeded { .. } => "LEARNING_BOUNDS_EXCEEDED",
            Self::OrderingViolation(_) => "THRESHOLD_ORDER_VIOLATION",
            Self::NotAdjustable(_) => "NOT_ADJUSTABLE",
            Self::UnknownMode(_) => "UNKNOWN_MODE",
            Self::InvalidFeedback(_) => "INVALID_FEEDBACK",
        }
    }

    /// Whether this rejection lowers the health score (input errors do not)
    fn affects_health(&self) -> bool {
        matches!(
            self,
            Self::LimitExceeded { .. }
                | Self::BoundsExceeded { .. }
                | Self::OrderingViolation(_)
                | Self::NotAdjustable(_)
        )
    }
}

/// Accepted feedback
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedbackOutcome {
    /// A threshold moved
    Adjusted {
        adjustment: AdjustmentRecord,
        generation: u64,
    },
    /// CONFIRMED_CORRECT: nothing to change
    Acknowledged { message_ref: String },
}

/// Health bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl HealthStatus {
    fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            Self::Excellent
        } else if score >= 0.70 {
            Self::Good
        } else if score >= 0.50 {
            Self::Warning
        } else {
            Self::Critical
        }
    }
}

/// Learning health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningHealthReport {
    pub score: f64,
    pub status: HealthStatus,
    pub enabled: bool,
    pub generation: u64,
    pub daily_adjustment_count: usize,
    pub max_adjustments_per_day: u32,
    pub remaining_quota: u32,
    pub daily_window_start: Option<DateTime<Utc>>,
    pub recent_outcomes: usize,
    pub recent_clamped: usize,
    pub recent_rejected: usize,
    pub history_len: usize,
    /// Active minus baseline, per mode and level
    pub drift: BTreeMap<String, BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecentOutcome {
    Accepted { clamped: bool },
    Rejected,
}

/// Mutable learning state; only the LearningSystem touches it
struct LearningState {
    tables: Arc<ThresholdTables>,
    baselines: ThresholdTables,
    /// Accepted-adjustment timestamps inside the rolling daily window
    accepted: VecDeque<DateTime<Utc>>,
    history: AdjustmentHistory,
    recent: VecDeque<RecentOutcome>,
    generation: u64,
}

impl LearningState {
    fn prune_window(&mut self, now: DateTime<Utc>) {
        while let Some(&oldest) = self.accepted.front() {
            if now - oldest >= daily_window() {
                self.accepted.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_window(&self, now: DateTime<Utc>) -> impl Iterator<Item = &DateTime<Utc>> {
        self.accepted.iter().filter(move |t| now - **t < daily_window())
    }

    fn note(&mut self, outcome: RecentOutcome) {
        if self.recent.len() >= RECENT_OUTCOME_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(outcome);
    }
}

/// Feedback-driven threshold adaptation
pub struct LearningSystem {
    config: LearningConfig,
    default_mode: String,
    state: RwLock<LearningState>,
    pool: Option<SqlitePool>,
    event_bus: Option<EventBus>,
}

impl LearningSystem {
    /// `tables` become both the active sets and their baselines
    pub fn new(config: LearningConfig, tables: ThresholdTables, default_mode: impl Into<String>) -> Self {
        let history = AdjustmentHistory::new(retained_history(&config));
        Self {
            state: RwLock::new(LearningState {
                baselines: tables.clone(),
                tables: Arc::new(tables),
                accepted: VecDeque::new(),
                history,
                recent: VecDeque::with_capacity(RECENT_OUTCOME_WINDOW),
                generation: 0,
            }),
            config,
            default_mode: default_mode.into(),
            pool: None,
            event_bus: None,
        }
    }

    /// Persist commits to this database
    pub fn with_pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Announce commits and rejections on this bus
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn default_mode(&self) -> &str {
        &self.default_mode
    }

    /// Load persisted threshold sets and history
    ///
    /// Persisted sets replace the configured ones for their mode. The daily
    /// window is rebuilt from history so a restart does not reset the quota.
    pub async fn restore(&self) -> crisis_common::Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        let stored = db::thresholds::load_threshold_sets(pool).await?;
        let records =
            db::history::load_recent_adjustments(pool, retained_history(&self.config)).await?;

        let now = Utc::now();
        let mut state = self.state.write().await;

        let bounds = self.config.sensitivity_bounds;
        let mut tables = (*state.tables).clone();
        let mut restored_sets = 0;
        for row in &stored {
            if let Err(e) = bounds.check(&row.active).and(bounds.check(&row.baseline)) {
                warn!(mode = %row.mode, error = %e, "Ignoring persisted threshold set, configured set stays");
                continue;
            }
            debug!(mode = %row.mode, updated_at = %row.updated_at, "Restored threshold set");
            tables.insert(row.mode.clone(), row.active.clone());
            state.baselines.insert(row.mode.clone(), row.baseline.clone());
            restored_sets += 1;
        }
        state.tables = Arc::new(tables);

        for record in records {
            if now - record.timestamp < daily_window() {
                state.accepted.push_back(record.timestamp);
            }
            state.history.push(record);
        }

        info!(
            threshold_sets = restored_sets,
            history = state.history.len(),
            daily_adjustments = state.accepted.len(),
            "Learning state restored"
        );
        Ok(())
    }

    /// Consistent view of every threshold table
    pub async fn snapshot(&self) -> ThresholdSnapshot {
        let state = self.state.read().await;
        ThresholdSnapshot::new(Arc::clone(&state.tables), state.generation)
    }

    pub async fn threshold_config(&self, mode: &str) -> Option<ThresholdSet> {
        self.state.read().await.tables.get(mode).cloned()
    }

    /// Operator write: validated set replaces both active set and baseline
    ///
    /// Returns the new generation.
    pub async fn put_threshold_config(
        &self,
        mode: &str,
        set: ThresholdSet,
    ) -> Result<u64, ThresholdConfigError> {
        set.validate()?;
        self.config.sensitivity_bounds.check(&set)?;

        let mut state = self.state.write().await;
        let mut tables = (*state.tables).clone();
        tables.insert(mode.to_string(), set.clone());
        state.tables = Arc::new(tables);
        state.baselines.insert(mode.to_string(), set.clone());
        state.generation += 1;
        let generation = state.generation;

        if let Some(pool) = &self.pool {
            if let Err(e) = db::thresholds::save_threshold_set(pool, mode, &set, &set).await {
                warn!(mode, error = %e, "Failed to persist threshold set, in-memory change stands");
            }
        }
        drop(state);

        info!(mode, generation, "Threshold set replaced by operator");
        self.emit(CrisisEvent::ThresholdsChanged {
            mode: mode.to_string(),
            generation,
            source: ThresholdChangeSource::Operator,
            timestamp: Utc::now(),
        });
        Ok(generation)
    }

    pub async fn record_feedback(
        &self,
        event: &FeedbackEvent,
    ) -> Result<FeedbackOutcome, LearningRejection> {
        self.record_feedback_at(event, Utc::now()).await
    }

    /// [`Self::record_feedback`] with an explicit clock
    pub async fn record_feedback_at(
        &self,
        event: &FeedbackEvent,
        now: DateTime<Utc>,
    ) -> Result<FeedbackOutcome, LearningRejection> {
        if !self.config.enabled {
            return Err(LearningRejection::Disabled);
        }
        if let Some(severity) = event.severity_score {
            if !severity.is_finite() || !(0.0..=1.0).contains(&severity) {
                return Err(LearningRejection::InvalidFeedback(format!(
                    "severity_score {} outside [0.0, 1.0]",
                    severity
                )));
            }
        }

        let (direction, level) = match event.feedback_type {
            FeedbackType::ConfirmedCorrect => {
                debug!(message_ref = %event.message_ref, "Decision confirmed correct");
                return Ok(FeedbackOutcome::Acknowledged {
                    message_ref: event.message_ref.clone(),
                });
            }
            FeedbackType::FalsePositive => {
                (AdjustmentDirection::FalsePositive, event.reported_crisis_level)
            }
            FeedbackType::FalseNegative => {
                (AdjustmentDirection::FalseNegative, event.correct_or_expected_level)
            }
        };
        let mode = event
            .mode
            .clone()
            .unwrap_or_else(|| self.default_mode.clone());

        let mut state = self.state.write().await;
        match self.try_adjust(&mut state, &mode, level, direction, event, now) {
            Ok(record) => {
                let generation = state.generation;
                if let Some(pool) = &self.pool {
                    self.persist_commit(pool, &state, &record).await;
                }
                drop(state);

                info!(
                    mode = %record.mode,
                    level = %record.crisis_level,
                    old_value = record.old_value,
                    new_value = record.new_value,
                    clamped = record.clamped,
                    generation,
                    "Threshold adjusted from feedback"
                );
                self.emit(CrisisEvent::ThresholdsChanged {
                    mode: record.mode.clone(),
                    generation,
                    source: ThresholdChangeSource::Learning,
                    timestamp: now,
                });
                Ok(FeedbackOutcome::Adjusted {
                    adjustment: record,
                    generation,
                })
            }
            Err(rejection) => {
                if rejection.affects_health() {
                    state.note(RecentOutcome::Rejected);
                }
                drop(state);

                warn!(
                    mode = %mode,
                    level = %level,
                    code = rejection.code(),
                    "Feedback rejected: {}",
                    rejection
                );
                self.emit(CrisisEvent::FeedbackRejected {
                    mode,
                    code: rejection.code().to_string(),
                    timestamp: now,
                });
                Err(rejection)
            }
        }
    }

    /// Check every limit and commit the adjustment; mutates only on success
    fn try_adjust(
        &self,
        state: &mut LearningState,
        mode: &str,
        level: CrisisLevel,
        direction: AdjustmentDirection,
        event: &FeedbackEvent,
        now: DateTime<Utc>,
    ) -> Result<AdjustmentRecord, LearningRejection> {
        if level == CrisisLevel::None {
            return Err(LearningRejection::NotAdjustable(level));
        }
        let current = state
            .tables
            .get(mode)
            .cloned()
            .ok_or_else(|| LearningRejection::UnknownMode(mode.to_string()))?;
        let baseline = state
            .baselines
            .get(mode)
            .cloned()
            .unwrap_or_else(|| current.clone());

        state.prune_window(now);
        let limit = self.config.max_adjustments_per_day;
        if state.accepted.len() >= limit as usize {
            return Err(LearningRejection::LimitExceeded {
                limit,
                window_start: state.accepted.front().copied(),
            });
        }

        let config = &self.config;
        let magnitude = (config.base_learning_rate
            * config.severity_multipliers.for_level(level)
            * event.severity_score.unwrap_or(1.0))
        .clamp(config.min_confidence_adjustment, config.max_confidence_adjustment);
        let requested_delta = match direction {
            AdjustmentDirection::FalsePositive => magnitude,
            AdjustmentDirection::FalseNegative => -magnitude,
        };

        let old_value = current.bound(level);
        let desired = old_value + requested_delta;
        let anchor = baseline.bound(level);
        let min = config
            .sensitivity_bounds
            .min
            .max(anchor - config.max_drift_from_baseline);
        let max = config
            .sensitivity_bounds
            .max
            .min(anchor + config.max_drift_from_baseline);
        // Never further than one maximum step from the current value
        let step = config.max_confidence_adjustment;
        let new_value = if min <= max {
            desired
                .clamp(min, max)
                .max(old_value - step)
                .min(old_value + step)
        } else {
            old_value
        };

        let moved = match direction {
            AdjustmentDirection::FalsePositive => new_value - old_value > MIN_MOVEMENT,
            AdjustmentDirection::FalseNegative => old_value - new_value > MIN_MOVEMENT,
        };
        if !moved {
            return Err(LearningRejection::BoundsExceeded {
                mode: mode.to_string(),
                level,
                value: old_value,
                min,
                max,
            });
        }

        let candidate = current.with_bound(level, new_value);
        candidate
            .validate()
            .map_err(LearningRejection::OrderingViolation)?;

        // Commit
        let mut tables = (*state.tables).clone();
        tables.insert(mode.to_string(), candidate);
        state.tables = Arc::new(tables);
        state
            .baselines
            .entry(mode.to_string())
            .or_insert(baseline);
        state.generation += 1;
        state.accepted.push_back(now);

        let clamped = (new_value - desired).abs() > MIN_MOVEMENT;
        let record = AdjustmentRecord {
            id: Uuid::new_v4(),
            timestamp: now,
            mode: mode.to_string(),
            message_ref: event.message_ref.clone(),
            crisis_level: level,
            direction,
            old_value,
            new_value,
            requested_delta,
            clamped,
        };
        state.history.push(record.clone());
        state.note(RecentOutcome::Accepted { clamped });

        Ok(record)
    }

    async fn persist_commit(&self, pool: &SqlitePool, state: &LearningState, record: &AdjustmentRecord) {
        if let (Some(active), Some(baseline)) =
            (state.tables.get(&record.mode), state.baselines.get(&record.mode))
        {
            if let Err(e) =
                db::thresholds::save_threshold_set(pool, &record.mode, active, baseline).await
            {
                warn!(mode = %record.mode, error = %e, "Failed to persist threshold set, in-memory commit stands");
            }
        }
        if let Err(e) =
            db::history::insert_adjustment(pool, record, retained_history(&self.config)).await
        {
            warn!(mode = %record.mode, error = %e, "Failed to persist adjustment record");
        }
    }

    /// Most recent adjustments, newest first
    pub async fn history(&self, limit: usize) -> Vec<AdjustmentRecord> {
        self.state.read().await.history.recent(limit)
    }

    pub async fn health_check(&self) -> LearningHealthReport {
        self.health_check_at(Utc::now()).await
    }

    /// `1 − 0.35·clamp_rate − 0.45·rejection_rate − 0.20·quota_used`
    pub async fn health_check_at(&self, now: DateTime<Utc>) -> LearningHealthReport {
        let state = self.state.read().await;

        let recent_outcomes = state.recent.len();
        let recent_clamped = state
            .recent
            .iter()
            .filter(|o| matches!(o, RecentOutcome::Accepted { clamped: true }))
            .count();
        let recent_rejected = state
            .recent
            .iter()
            .filter(|o| matches!(o, RecentOutcome::Rejected))
            .count();
        let (clamp_rate, rejection_rate) = if recent_outcomes == 0 {
            (0.0, 0.0)
        } else {
            (
                recent_clamped as f64 / recent_outcomes as f64,
                recent_rejected as f64 / recent_outcomes as f64,
            )
        };

        let limit = self.config.max_adjustments_per_day;
        let daily_adjustment_count = state.in_window(now).count();
        let daily_window_start = state.in_window(now).next().copied();
        let quota_used = if limit == 0 {
            1.0
        } else {
            (daily_adjustment_count as f64 / limit as f64).min(1.0)
        };

        let score =
            (1.0 - 0.35 * clamp_rate - 0.45 * rejection_rate - 0.20 * quota_used).clamp(0.0, 1.0);

        let drift: BTreeMap<String, BTreeMap<String, f64>> = state
            .tables
            .iter()
            .map(|(mode, active)| {
                let baseline = state.baselines.get(mode).unwrap_or(active);
                let per_level: BTreeMap<String, f64> = CrisisLevel::BOUNDED
                    .iter()
                    .map(|&level| {
                        (
                            level.as_str().to_string(),
                            active.bound(level) - baseline.bound(level),
                        )
                    })
                    .collect();
                (mode.clone(), per_level)
            })
            .collect();

        LearningHealthReport {
            score,
            status: HealthStatus::from_score(score),
            enabled: self.config.enabled,
            generation: state.generation,
            daily_adjustment_count,
            max_adjustments_per_day: limit,
            remaining_quota: limit.saturating_sub(daily_adjustment_count as u32),
            daily_window_start,
            recent_outcomes,
            recent_clamped,
            recent_rejected,
            history_len: state.history.len(),
            drift,
        }
    }

    fn emit(&self, event: CrisisEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{default_threshold_tables, SensitivityBounds, ServiceConfig};
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn system(config: LearningConfig) -> LearningSystem {
        LearningSystem::new(config, default_threshold_tables(), "weighted")
    }

    fn feedback(feedback_type: FeedbackType, reported: CrisisLevel, expected: CrisisLevel) -> FeedbackEvent {
        FeedbackEvent {
            message_ref: "msg-1".to_string(),
            reported_crisis_level: reported,
            correct_or_expected_level: expected,
            feedback_type,
            severity_score: None,
            mode: None,
        }
    }

    fn false_positive(level: CrisisLevel) -> FeedbackEvent {
        feedback(FeedbackType::FalsePositive, level, CrisisLevel::None)
    }

    fn false_negative(level: CrisisLevel) -> FeedbackEvent {
        feedback(FeedbackType::FalseNegative, CrisisLevel::None, level)
    }

    fn adjusted(outcome: FeedbackOutcome) -> AdjustmentRecord {
        match outcome {
            FeedbackOutcome::Adjusted { adjustment, .. } => adjustment,
            other => panic!("expected adjustment, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_false_positive_raises_reported_level() {
        let learning = system(LearningConfig::default());
        let record = adjusted(
            learning
                .record_feedback_at(&false_positive(CrisisLevel::Medium), start())
                .await
                .unwrap(),
        );
        assert_eq!(record.crisis_level, CrisisLevel::Medium);
        assert_eq!(record.direction, AdjustmentDirection::FalsePositive);
        assert_eq!(record.old_value, 0.35);
        assert!((record.new_value - 0.37).abs() < 1e-12);
        assert!(!record.clamped);

        let snapshot = learning.snapshot().await;
        assert_eq!(snapshot.generation(), 1);
        assert!((snapshot.get("weighted").unwrap().medium - 0.37).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_false_negative_lowers_expected_level() {
        let learning = system(LearningConfig::default());
        let record = adjusted(
            learning
                .record_feedback_at(&false_negative(CrisisLevel::High), start())
                .await
                .unwrap(),
        );
        // 0.02 × 1.2 (high multiplier)
        assert!((record.requested_delta + 0.024).abs() < 1e-12);
        assert!((record.new_value - 0.576).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_severity_scales_step_before_clamp() {
        let learning = system(LearningConfig::default());
        let mut event = false_positive(CrisisLevel::Medium);
        event.severity_score = Some(0.1);
        let record = adjusted(learning.record_feedback_at(&event, start()).await.unwrap());
        // 0.002 raised to the 0.005 minimum step
        assert!((record.requested_delta - 0.005).abs() < 1e-12);

        event.severity_score = Some(1.5);
        assert!(matches!(
            learning.record_feedback_at(&event, start()).await,
            Err(LearningRejection::InvalidFeedback(_))
        ));
    }

    #[tokio::test]
    async fn test_daily_cap_is_a_rolling_window() {
        let config = LearningConfig {
            max_adjustments_per_day: 3,
            ..LearningConfig::default()
        };
        let learning = system(config);
        let t0 = start();

        for i in 0..3 {
            learning
                .record_feedback_at(&false_positive(CrisisLevel::Medium), t0 + Duration::hours(i))
                .await
                .unwrap();
        }
        let before = learning.snapshot().await;

        let rejected = learning
            .record_feedback_at(&false_positive(CrisisLevel::Medium), t0 + Duration::hours(5))
            .await;
        match rejected {
            Err(LearningRejection::LimitExceeded { limit, window_start }) => {
                assert_eq!(limit, 3);
                assert_eq!(window_start, Some(t0));
            }
            other => panic!("expected LimitExceeded, got {:?}", other),
        }
        let after = learning.snapshot().await;
        assert_eq!(before.tables(), after.tables());
        assert_eq!(before.generation(), after.generation());

        // First adjustment leaves the window after 24h
        learning
            .record_feedback_at(&false_positive(CrisisLevel::Medium), t0 + Duration::hours(24))
            .await
            .unwrap();
        assert!(learning
            .record_feedback_at(&false_positive(CrisisLevel::Medium), t0 + Duration::hours(24))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_drift_clamp_then_bounds_exceeded() {
        let config = LearningConfig {
            max_drift_from_baseline: 0.03,
            ..LearningConfig::default()
        };
        let learning = system(config);
        let event = false_positive(CrisisLevel::Medium);

        let first = adjusted(learning.record_feedback_at(&event, start()).await.unwrap());
        assert!(!first.clamped);

        let second = adjusted(learning.record_feedback_at(&event, start()).await.unwrap());
        assert!(second.clamped);
        assert!((second.new_value - 0.38).abs() < 1e-12);

        let before = learning.snapshot().await;
        assert!(matches!(
            learning.record_feedback_at(&event, start()).await,
            Err(LearningRejection::BoundsExceeded { level: CrisisLevel::Medium, .. })
        ));
        assert_eq!(before.tables(), learning.snapshot().await.tables());
    }

    #[tokio::test]
    async fn test_sensitivity_bounds_win_when_tighter() {
        let config = LearningConfig {
            sensitivity_bounds: SensitivityBounds { min: 0.05, max: 0.81 },
            ..LearningConfig::default()
        };
        let learning = system(config);
        let record = adjusted(
            learning
                .record_feedback_at(&false_positive(CrisisLevel::Critical), start())
                .await
                .unwrap(),
        );
        assert!(record.clamped);
        assert!((record.new_value - 0.81).abs() < 1e-12);
        assert!((record.requested_delta - 0.03).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_ordering_violation_rejected_without_mutation() {
        let mut tables = ThresholdTables::new();
        tables.insert(
            "tight".to_string(),
            ThresholdSet::with_bounds(0.15, 0.16, 0.60, 0.80),
        );
        let learning = LearningSystem::new(LearningConfig::default(), tables, "tight");
        let before = learning.snapshot().await;

        assert!(matches!(
            learning
                .record_feedback_at(&false_negative(CrisisLevel::Medium), start())
                .await,
            Err(LearningRejection::OrderingViolation(_))
        ));
        assert_eq!(before.tables(), learning.snapshot().await.tables());
        assert_eq!(learning.health_check_at(start()).await.recent_rejected, 1);
    }

    #[tokio::test]
    async fn test_none_level_and_unknown_mode() {
        let learning = system(LearningConfig::default());
        let err = learning
            .record_feedback_at(&false_positive(CrisisLevel::None), start())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_ADJUSTABLE");

        let mut event = false_positive(CrisisLevel::Low);
        event.mode = Some("nope".to_string());
        let err = learning.record_feedback_at(&event, start()).await.unwrap_err();
        assert_eq!(err, LearningRejection::UnknownMode("nope".to_string()));
    }

    #[tokio::test]
    async fn test_confirmed_correct_uses_no_quota() {
        let config = LearningConfig {
            max_adjustments_per_day: 1,
            ..LearningConfig::default()
        };
        let learning = system(config);
        let event = feedback(
            FeedbackType::ConfirmedCorrect,
            CrisisLevel::Medium,
            CrisisLevel::Medium,
        );
        for _ in 0..5 {
            assert!(matches!(
                learning.record_feedback_at(&event, start()).await.unwrap(),
                FeedbackOutcome::Acknowledged { .. }
            ));
        }
        assert_eq!(learning.snapshot().await.generation(), 0);
        assert_eq!(learning.health_check_at(start()).await.remaining_quota, 1);
    }

    #[tokio::test]
    async fn test_disabled_learning_rejects() {
        let config = LearningConfig {
            enabled: false,
            ..LearningConfig::default()
        };
        let learning = system(config);
        assert_eq!(
            learning
                .record_feedback_at(&false_positive(CrisisLevel::Low), start())
                .await
                .unwrap_err(),
            LearningRejection::Disabled
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_feedback_respects_cap() {
        let config = LearningConfig {
            max_adjustments_per_day: 5,
            max_drift_from_baseline: 0.5,
            sensitivity_bounds: SensitivityBounds { min: 0.01, max: 0.99 },
            ..LearningConfig::default()
        };
        let learning = Arc::new(system(config));
        let now = start();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let learning = Arc::clone(&learning);
                let level = CrisisLevel::BOUNDED[i % 4];
                tokio::spawn(async move {
                    learning
                        .record_feedback_at(&false_positive(level), now)
                        .await
                        .is_ok()
                })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 5);

        let snapshot = learning.snapshot().await;
        assert_eq!(snapshot.generation(), 5);
        for set in snapshot.tables().values() {
            assert!(set.validate().is_ok());
        }
    }

    #[tokio::test]
    async fn test_operator_write_resets_baseline() {
        let learning = system(LearningConfig {
            max_drift_from_baseline: 0.02,
            ..LearningConfig::default()
        });
        let event = false_positive(CrisisLevel::Medium);
        learning.record_feedback_at(&event, start()).await.unwrap();
        assert!(learning.record_feedback_at(&event, start()).await.is_err());

        let replacement = ThresholdSet::with_bounds(0.2, 0.4, 0.6, 0.8);
        let generation = learning
            .put_threshold_config("weighted", replacement.clone())
            .await
            .unwrap();
        assert_eq!(generation, 2);
        assert_eq!(learning.threshold_config("weighted").await, Some(replacement));

        // New baseline gives fresh drift room
        let record = adjusted(learning.record_feedback_at(&event, start()).await.unwrap());
        assert!((record.new_value - 0.42).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_invalid_operator_write_rejected() {
        let learning = system(LearningConfig::default());
        let before = learning.snapshot().await;
        assert!(learning
            .put_threshold_config("weighted", ThresholdSet::with_bounds(0.4, 0.3, 0.6, 0.8))
            .await
            .is_err());
        let after = learning.snapshot().await;
        assert_eq!(before.tables(), after.tables());
        assert_eq!(after.generation(), 0);
    }

    #[tokio::test]
    async fn test_health_report() {
        let config = LearningConfig {
            max_adjustments_per_day: 3,
            ..LearningConfig::default()
        };
        let learning = system(config);
        let fresh = learning.health_check_at(start()).await;
        assert_eq!(fresh.score, 1.0);
        assert_eq!(fresh.status, HealthStatus::Excellent);

        for _ in 0..5 {
            let _ = learning
                .record_feedback_at(&false_positive(CrisisLevel::Medium), start())
                .await;
        }
        let report = learning.health_check_at(start()).await;
        assert_eq!(report.recent_outcomes, 5);
        assert_eq!(report.recent_rejected, 2);
        assert_eq!(report.remaining_quota, 0);
        // 1 − 0.45 × 0.4 − 0.20 × 1.0
        assert!((report.score - 0.62).abs() < 1e-9);
        assert_eq!(report.status, HealthStatus::Warning);
        assert!((report.drift["weighted"]["medium"] - 0.06).abs() < 1e-9);
        assert_eq!(report.history_len, 3);
    }

    #[tokio::test]
    async fn test_commits_and_rejections_emit_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let learning = system(LearningConfig::default()).with_event_bus(bus);

        learning
            .record_feedback_at(&false_positive(CrisisLevel::Low), start())
            .await
            .unwrap();
        let _ = learning
            .record_feedback_at(&false_positive(CrisisLevel::None), start())
            .await;

        match rx.recv().await.unwrap() {
            CrisisEvent::ThresholdsChanged { mode, generation, source, .. } => {
                assert_eq!(mode, "weighted");
                assert_eq!(generation, 1);
                assert_eq!(source, ThresholdChangeSource::Learning);
            }
            other => panic!("unexpected event {:?}", other),
        }
        match rx.recv().await.unwrap() {
            CrisisEvent::FeedbackRejected { code, .. } => assert_eq!(code, "NOT_ADJUSTABLE"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_restore_from_database() {
        let pool = db::test_pool().await;
        let now = Utc::now();

        let first = system(LearningConfig::default()).with_pool(pool.clone());
        first
            .record_feedback_at(&false_positive(CrisisLevel::Medium), now)
            .await
            .unwrap();
        first
            .put_threshold_config("custom", ThresholdSet::with_bounds(0.1, 0.2, 0.3, 0.4))
            .await
            .unwrap();

        let second = system(LearningConfig::default()).with_pool(pool);
        second.restore().await.unwrap();

        let restored = second.snapshot().await;
        assert_eq!(restored.tables(), first.snapshot().await.tables());
        assert_eq!(second.history(10).await.len(), 1);
        let report = second.health_check_at(now).await;
        assert_eq!(report.daily_adjustment_count, 1);
        assert!((report.drift["weighted"]["medium"] - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_step_never_exceeds_maximum_when_table_starts_outside_bounds() {
        let config = LearningConfig {
            sensitivity_bounds: SensitivityBounds { min: 0.3, max: 0.95 },
            ..LearningConfig::default()
        };
        let max_step = config.max_confidence_adjustment;
        let learning = system(config);

        let record = adjusted(
            learning
                .record_feedback_at(&false_positive(CrisisLevel::Low), start())
                .await
                .unwrap(),
        );
        assert_eq!(record.old_value, 0.15);
        assert!((record.new_value - record.old_value).abs() <= max_step + 1e-12);
        assert!(record.clamped);
    }

    #[tokio::test]
    async fn test_operator_write_outside_sensitivity_bounds_rejected() {
        let learning = system(LearningConfig {
            sensitivity_bounds: SensitivityBounds { min: 0.1, max: 0.9 },
            ..LearningConfig::default()
        });
        let err = learning
            .put_threshold_config("weighted", ThresholdSet::with_bounds(0.05, 0.3, 0.6, 0.8))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ThresholdConfigError::OutsideSensitivityBounds { level: CrisisLevel::Low, .. }
        ));
        assert_eq!(learning.snapshot().await.generation(), 0);
    }

    fn sweep_configs() -> Vec<ServiceConfig> {
        let mut configs = vec![ServiceConfig::default()];

        let mut tight = ServiceConfig::default();
        tight.learning.sensitivity_bounds = SensitivityBounds { min: 0.3, max: 0.95 };
        tight.learning.max_drift_from_baseline = 0.1;
        for set in tight.thresholds.values_mut() {
            *set = ThresholdSet::with_bounds(0.3, 0.45, 0.65, 0.85);
        }
        configs.push(tight);

        let mut small_steps = ServiceConfig::default();
        small_steps.learning.base_learning_rate = 0.05;
        small_steps.learning.max_confidence_adjustment = 0.01;
        small_steps.learning.max_adjustments_per_day = 5;
        small_steps.learning.history_capacity = 5;
        configs.push(small_steps);

        let mut aggressive = ServiceConfig::default();
        aggressive.learning.base_learning_rate = 0.2;
        aggressive.learning.max_confidence_adjustment = 0.08;
        aggressive.learning.max_drift_from_baseline = 0.4;
        aggressive.learning.sensitivity_bounds = SensitivityBounds { min: 0.1, max: 0.9 };
        aggressive.learning.max_adjustments_per_day = 500;
        aggressive.learning.history_capacity = 500;
        configs.push(aggressive);

        configs
    }

    #[tokio::test]
    async fn test_random_feedback_keeps_thresholds_bounded() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        for (index, config) in sweep_configs().into_iter().enumerate() {
            config.validate().unwrap();
            let limits = config.learning.clone();
            let baselines = config.thresholds.clone();
            let modes: Vec<String> = baselines.keys().cloned().collect();
            let learning = LearningSystem::new(
                limits.clone(),
                config.thresholds.clone(),
                config.default_mode(),
            );

            let mut rng = StdRng::seed_from_u64(index as u64 + 1);
            let mut now = start();
            let mut accepted: Vec<DateTime<Utc>> = Vec::new();

            for n in 0..600 {
                now += Duration::minutes(rng.gen_range(1..=90));
                let feedback_type = match rng.gen_range(0..10) {
                    0 => FeedbackType::ConfirmedCorrect,
                    1..=5 => FeedbackType::FalsePositive,
                    _ => FeedbackType::FalseNegative,
                };
                let level = CrisisLevel::ALL[rng.gen_range(0..CrisisLevel::ALL.len())];
                let mut event = feedback(feedback_type, level, level);
                event.message_ref = format!("msg-{}", n);
                event.mode = Some(modes[rng.gen_range(0..modes.len())].clone());
                event.severity_score = rng.gen_bool(0.5).then(|| rng.gen_range(0.0..=1.0));

                match learning.record_feedback_at(&event, now).await {
                    Ok(FeedbackOutcome::Adjusted { adjustment, .. }) => {
                        let step = (adjustment.new_value - adjustment.old_value).abs();
                        assert!(
                            step <= limits.max_confidence_adjustment + 1e-12,
                            "config {}: step {} on {:?}",
                            index,
                            step,
                            adjustment
                        );
                        accepted.push(now);
                        let in_window = accepted
                            .iter()
                            .filter(|t| now - **t < Duration::hours(24))
                            .count();
                        assert!(in_window <= limits.max_adjustments_per_day as usize);
                    }
                    Ok(FeedbackOutcome::Acknowledged { .. }) => {
                        assert_eq!(feedback_type, FeedbackType::ConfirmedCorrect);
                    }
                    Err(_) => {}
                }

                let snapshot = learning.snapshot().await;
                for (mode, set) in snapshot.tables() {
                    set.validate().unwrap();
                    limits.sensitivity_bounds.check(set).unwrap();
                    for level in CrisisLevel::BOUNDED {
                        let drift = (set.bound(level) - baselines[mode].bound(level)).abs();
                        assert!(
                            drift <= limits.max_drift_from_baseline + 1e-12,
                            "config {}: {} {} drifted {}",
                            index,
                            mode,
                            level,
                            drift
                        );
                    }
                }
            }
            assert!(!accepted.is_empty(), "config {} never adjusted", index);
        }
    }
}

