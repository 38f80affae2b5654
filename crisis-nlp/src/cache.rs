//! Response cache for resolved analyses
//!
//! TinyLFU cache (moka) with per-entry TTL. The key covers everything that
//! can change a decision: normalized-text hash, algorithm, mode, effective
//! weights, history context and the threshold generation. A threshold commit
//! therefore makes older entries unreachable at once; the invalidation
//! listener additionally drops them to release memory.

use crate::types::{ConsensusAlgorithm, EnsembleResult, HistoryContext};
use crisis_common::events::{CrisisEvent, EventBus};
use crisis_common::text::content_hash;
use moka::sync::Cache;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a cached decision depends on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(
        text: &str,
        algorithm: ConsensusAlgorithm,
        mode: &str,
        weights: &BTreeMap<String, f64>,
        context: &HistoryContext,
        generation: u64,
    ) -> Self {
        let mut key = format!("{}|{}|{}|", content_hash(text), algorithm, mode);
        for (model_id, weight) in weights {
            let _ = write!(key, "{}={:x};", model_id, weight.to_bits());
        }
        let _ = write!(
            key,
            "|{:x}|{}|{}",
            context.context_boost.to_bits(),
            context.requires_escalation_review,
            generation
        );
        Self(key)
    }
}

/// TTL cache of RESOLVED results
pub struct ResponseCache {
    cache: Cache<CacheKey, Arc<EnsembleResult>>,
}

impl ResponseCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<EnsembleResult>> {
        self.cache.get(key)
    }

    pub fn insert(&self, key: CacheKey, result: Arc<EnsembleResult>) {
        self.cache.insert(key, result);
    }

    /// Drop every entry
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate entry count
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

/// Drop cached decisions whenever a threshold table is committed
///
/// Runs until `shutdown` fires or the bus closes. A lagged receiver may
/// have missed a commit, so it invalidates too.
pub fn spawn_invalidation_listener(
    cache: Arc<ResponseCache>,
    event_bus: &EventBus,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(CrisisEvent::ThresholdsChanged { mode, generation, .. }) => {
                    debug!(mode = %mode, generation, "Thresholds changed, invalidating response cache");
                    cache.invalidate_all();
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache invalidation listener lagged, invalidating response cache");
                    cache.invalidate_all();
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AgreementLevel, AnalysisStatus, CrisisLevel};
    use crisis_common::events::ThresholdChangeSource;

    fn result() -> Arc<EnsembleResult> {
        Arc::new(EnsembleResult {
            signals: vec![],
            consensus_score: 0.4,
            consensus_label: "none".to_string(),
            agreement_level: AgreementLevel::Unanimous,
            conflict: None,
            crisis_level: CrisisLevel::Medium,
            requires_staff_review: false,
            algorithm: ConsensusAlgorithm::Weighted,
            mode: "weighted".to_string(),
            status: AnalysisStatus::Resolved,
            decision_confidence: 1.0,
            review_reasons: vec![],
            failed_models: vec![],
            context_boost: 0.0,
        })
    }

    fn key(text: &str, generation: u64) -> CacheKey {
        CacheKey::new(
            text,
            ConsensusAlgorithm::Weighted,
            "weighted",
            &BTreeMap::new(),
            &HistoryContext::default(),
            generation,
        )
    }

    #[test]
    fn test_key_normalizes_text_and_tracks_generation() {
        assert_eq!(key("I can't  cope", 1), key("i can't cope", 1));
        assert_ne!(key("i can't cope", 1), key("i can't cope", 2));
        assert_ne!(key("i can't cope", 1), key("i can cope", 1));
    }

    #[test]
    fn test_key_covers_weights_and_context() {
        let mut weights = BTreeMap::new();
        weights.insert("a".to_string(), 0.5);
        let weighted = CacheKey::new(
            "text",
            ConsensusAlgorithm::Weighted,
            "weighted",
            &weights,
            &HistoryContext::default(),
            0,
        );
        assert_ne!(weighted, key("text", 0));

        let boosted = CacheKey::new(
            "text",
            ConsensusAlgorithm::Weighted,
            "weighted",
            &BTreeMap::new(),
            &HistoryContext {
                context_boost: 0.1,
                requires_escalation_review: false,
            },
            0,
        );
        assert_ne!(boosted, key("text", 0));
    }

    #[test]
    fn test_insert_get_invalidate() {
        let cache = ResponseCache::new(100, Duration::from_secs(60));
        cache.insert(key("hello", 0), result());
        assert!(cache.get(&key("hello", 0)).is_some());
        assert!(cache.get(&key("hello", 1)).is_none());

        cache.invalidate_all();
        assert!(cache.get(&key("hello", 0)).is_none());
    }

    #[tokio::test]
    async fn test_listener_invalidates_on_threshold_change() {
        let bus = EventBus::new(16);
        let cache = Arc::new(ResponseCache::new(100, Duration::from_secs(60)));
        let shutdown = CancellationToken::new();
        let handle = spawn_invalidation_listener(Arc::clone(&cache), &bus, shutdown.clone());

        cache.insert(key("hello", 0), result());
        bus.emit_lossy(CrisisEvent::ThresholdsChanged {
            mode: "weighted".to_string(),
            generation: 1,
            source: ThresholdChangeSource::Learning,
            timestamp: chrono::Utc::now(),
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while cache.get(&key("hello", 0)).is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("cache was not invalidated");

        shutdown.cancel();
        handle.await.unwrap();
    }
}
