//! Adjustment audit trail
//!
//! Fixed-capacity ring buffer: pushing into a full buffer evicts the oldest
//! record.

use crate::types::{AdjustmentDirection, CrisisLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// One accepted threshold adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub mode: String,
    pub message_ref: String,
    pub crisis_level: CrisisLevel,
    pub direction: AdjustmentDirection,
    pub old_value: f64,
    pub new_value: f64,
    /// Signed step before the bounds/drift clamp
    pub requested_delta: f64,
    /// True when the bounds/drift clamp changed the value
    pub clamped: bool,
}

#[derive(Debug, Clone)]
pub struct AdjustmentHistory {
    capacity: usize,
    records: VecDeque<AdjustmentRecord>,
}

impl AdjustmentHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            records: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, record: AdjustmentRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Up to `limit` records, newest first
    pub fn recent(&self, limit: usize) -> Vec<AdjustmentRecord> {
        self.records.iter().rev().take(limit).cloned().collect()
    }
}
