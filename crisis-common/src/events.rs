//! Event types for the crisis event system
//!
//! Provides shared event definitions and the EventBus used to fan out
//! state changes (threshold commits, degraded classifiers) to listeners
//! such as the response cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What caused a threshold table to change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdChangeSource {
    /// Accepted correction feedback
    Learning,
    /// Operator write through the configuration API
    Operator,
}

/// Crisis service event types
///
/// Events are broadcast via EventBus. Every consumer matches exhaustively,
/// so adding a variant is a compile-time visible change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CrisisEvent {
    /// A threshold table was committed
    ///
    /// Triggers:
    /// - Response cache: drop every cached decision
    ThresholdsChanged {
        /// Threshold table key
        mode: String,
        /// Learning-state generation after the commit
        generation: u64,
        /// Learning or operator
        source: ThresholdChangeSource,
        /// When the commit happened
        timestamp: DateTime<Utc>,
    },

    /// Correction feedback was rejected without mutation
    FeedbackRejected {
        /// Threshold table key
        mode: String,
        /// Machine-readable rejection code
        code: String,
        /// When the rejection happened
        timestamp: DateTime<Utc>,
    },

    /// A classifier timed out or failed during an analysis
    ClassifierDegraded {
        /// Classifier identifier
        model_id: String,
        /// Failure description
        reason: String,
        /// When the failure was observed
        timestamp: DateTime<Utc>,
    },

    /// No classifier (including the fallback) produced a signal
    AnalysisUnresolved {
        /// Classifiers that failed
        failed_models: Vec<String>,
        /// When the analysis finished
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus shared by all components of a service
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CrisisEvent>,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use crisis_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// let _rx = event_bus.subscribe();
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<CrisisEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CrisisEvent) {
        let _ = self.tx.send(event);
    }
}
