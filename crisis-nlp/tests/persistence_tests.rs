//! Learning state survives a restart through the on-disk database

use crisis_nlp::config::ServiceConfig;
use crisis_nlp::db::init_database_pool;
use crisis_nlp::learning::{FeedbackOutcome, LearningRejection, LearningSystem};
use crisis_nlp::types::{CrisisLevel, FeedbackEvent, FeedbackType};

fn learning(config: &ServiceConfig, pool: sqlx::SqlitePool) -> LearningSystem {
    LearningSystem::new(
        config.learning.clone(),
        config.thresholds.clone(),
        config.default_mode(),
    )
    .with_pool(pool)
}

fn false_negative(message_ref: &str) -> FeedbackEvent {
    FeedbackEvent {
        message_ref: message_ref.to_string(),
        reported_crisis_level: CrisisLevel::Medium,
        correct_or_expected_level: CrisisLevel::High,
        feedback_type: FeedbackType::FalseNegative,
        severity_score: None,
        mode: Some("weighted".to_string()),
    }
}

#[tokio::test]
async fn test_thresholds_and_history_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crisis_nlp.db");
    let config = ServiceConfig::default();

    let adjusted_high = {
        let pool = init_database_pool(&db_path).await.unwrap();
        let system = learning(&config, pool.clone());
        system.restore().await.unwrap();

        let outcome = system.record_feedback(&false_negative("msg-1")).await.unwrap();
        let FeedbackOutcome::Adjusted { adjustment, .. } = outcome else {
            panic!("expected an adjustment");
        };
        assert_eq!(adjustment.crisis_level, CrisisLevel::High);
        assert!(adjustment.new_value < adjustment.old_value);
        pool.close().await;
        adjustment.new_value
    };

    let pool = init_database_pool(&db_path).await.unwrap();
    let restarted = learning(&config, pool);
    restarted.restore().await.unwrap();

    let weighted = restarted.threshold_config("weighted").await.unwrap();
    assert_eq!(weighted.high, adjusted_high);
    // Untouched modes keep the configured sets
    assert_eq!(
        restarted.threshold_config("unanimous").await,
        config.thresholds.get("unanimous").cloned()
    );

    let history = restarted.history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message_ref, "msg-1");

    let health = restarted.health_check().await;
    assert_eq!(health.daily_adjustment_count, 1);
}

#[tokio::test]
async fn test_daily_quota_counts_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crisis_nlp.db");
    let mut config = ServiceConfig::default();
    config.learning.max_adjustments_per_day = 2;

    {
        let pool = init_database_pool(&db_path).await.unwrap();
        let system = learning(&config, pool.clone());
        system.restore().await.unwrap();
        system.record_feedback(&false_negative("a")).await.unwrap();
        system.record_feedback(&false_negative("b")).await.unwrap();
        pool.close().await;
    }

    let pool = init_database_pool(&db_path).await.unwrap();
    let restarted = learning(&config, pool);
    restarted.restore().await.unwrap();

    let before = restarted.threshold_config("weighted").await;
    let rejection = restarted
        .record_feedback(&false_negative("c"))
        .await
        .unwrap_err();
    assert!(matches!(rejection, LearningRejection::LimitExceeded { limit: 2, .. }));
    assert_eq!(restarted.threshold_config("weighted").await, before);
}

#[tokio::test]
async fn test_daily_quota_survives_restart_with_short_history() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crisis_nlp.db");
    let mut config = ServiceConfig::default();
    config.learning.max_adjustments_per_day = 5;
    config.learning.history_capacity = 2;
    // Startup refuses this pairing; the learning system still keeps enough history on its own
    assert!(config.validate().is_err());

    let mut accepted = 0;
    for run in 0..2 {
        let pool = init_database_pool(&db_path).await.unwrap();
        let system = learning(&config, pool.clone());
        system.restore().await.unwrap();

        for i in 0..10 {
            match system
                .record_feedback(&false_negative(&format!("run{}-{}", run, i)))
                .await
            {
                Ok(_) => accepted += 1,
                Err(rejection) => assert!(
                    matches!(rejection, LearningRejection::LimitExceeded { limit: 5, .. }),
                    "unexpected rejection {:?}",
                    rejection
                ),
            }
        }
        assert_eq!(system.health_check().await.daily_adjustment_count, 5);
        pool.close().await;
    }
    assert_eq!(accepted, 5);
}

#[tokio::test]
async fn test_operator_write_persists_as_new_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crisis_nlp.db");
    let config = ServiceConfig::default();
    let replacement = crisis_nlp::thresholds::ThresholdSet::with_bounds(0.1, 0.3, 0.5, 0.7);

    {
        let pool = init_database_pool(&db_path).await.unwrap();
        let system = learning(&config, pool.clone());
        system.restore().await.unwrap();
        let generation = system
            .put_threshold_config("majority", replacement.clone())
            .await
            .unwrap();
        assert_eq!(generation, 1);
        pool.close().await;
    }

    let pool = init_database_pool(&db_path).await.unwrap();
    let restarted = learning(&config, pool);
    restarted.restore().await.unwrap();
    assert_eq!(restarted.threshold_config("majority").await, Some(replacement));

    let health = restarted.health_check().await;
    assert_eq!(health.drift["majority"]["high"], 0.0);
}
