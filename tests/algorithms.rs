//! Integration tests for rate limiting algorithms.

use std::time::Duration;

use admitgate::storage::Storage;
use admitgate::{
    Algorithm, AlgorithmConfig, FixedWindow, MemoryStorage, Quota, SlidingWindowCounter,
    SlidingWindowLog, TokenBucket, GCRA,
};

/// Send one request every `step_ms` in `[from, to)` and count admissions.
async fn admitted<A: Algorithm>(algorithm: &A, key: &str, from: u64, to: u64, step_ms: u64) -> u64 {
    let storage = MemoryStorage::new();
    let mut admitted = 0;
    for now in (from..to).step_by(step_ms as usize) {
        if algorithm
            .check_and_record(&storage, key, now)
            .await
            .unwrap()
            .is_allowed()
        {
            admitted += 1;
        }
    }
    admitted
}

#[tokio::test]
async fn test_exact_algorithms_never_exceed_rate() {
    // 20 per second over a 5 second horizon.
    let horizon_ms = 5_000;
    let bound = 20 * 5;

    let exact: Vec<AlgorithmConfig> = vec![
        SlidingWindowLog::new(Quota::per_second(20)).into(),
        SlidingWindowCounter::new(Quota::per_second(20), 1).into(),
        SlidingWindowCounter::new(Quota::per_second(20), 10).into(),
        FixedWindow::new(Quota::per_second(20)).into(),
        GCRA::new(Quota::per_second(20), 0).into(),
    ];
    for algorithm in &exact {
        let count = admitted(algorithm, "k", 0, horizon_ms, 7).await;
        assert!(count <= bound, "{} admitted {}", algorithm.name(), count);
        assert!(count >= bound / 2, "{} admitted only {}", algorithm.name(), count);
    }
}

#[tokio::test]
async fn test_uneven_rates_never_exceed_quota() {
    // 7 per second does not divide the window into whole milliseconds.
    let quota = Quota::new(7, Duration::from_secs(1));
    let bound = 7 * 5;

    let algorithms: Vec<AlgorithmConfig> = vec![
        SlidingWindowLog::new(quota).into(),
        SlidingWindowCounter::new(quota, 3).into(),
        FixedWindow::new(quota).into(),
        GCRA::new(quota, 0).into(),
    ];
    for algorithm in &algorithms {
        let count = admitted(algorithm, "k", 0, 5_000, 1).await;
        assert!(count <= bound, "{} admitted {}", algorithm.name(), count);
        assert!(count >= bound - 7, "{} admitted only {}", algorithm.name(), count);
    }

    let gcra = GCRA::new(Quota::new(3, Duration::from_secs(1)), 0);
    assert_eq!(admitted(&gcra, "k", 0, 1_000, 1).await, 3);
}

#[tokio::test]
async fn test_fixed_window_bound_with_boundary_slack() {
    let algorithm = FixedWindow::new(Quota::per_second(20));

    // An unaligned horizon touches one extra window.
    let count = admitted(&algorithm, "k", 500, 5_500, 3).await;
    assert!(count <= 2 * 20 * 5);
    assert_eq!(count, 20 * 6);
}

#[tokio::test]
async fn test_gcra_and_token_bucket_bounds() {
    // 10/s with 4 extra allowed ahead of schedule.
    let gcra = GCRA::new(Quota::per_second(10), 4);
    let count = admitted(&gcra, "k", 0, 3_000, 5).await;
    assert!(count <= 5 + 30, "gcra admitted {}", count);

    let bucket = TokenBucket::new(5.0, 10.0);
    let count = admitted(&bucket, "k", 0, 3_000, 5).await;
    assert!(count <= 5 + 30, "token bucket admitted {}", count);
}

#[tokio::test]
async fn test_sliding_log_prunes_on_every_check() {
    let storage = MemoryStorage::new();
    let window_ms = 1_000;
    let algorithm = SlidingWindowLog::new(Quota::per_second(5));

    for now in (0..4_000).step_by(37) {
        let decision = algorithm.check_and_record(&storage, "k", now).await.unwrap();
        let entry = storage.get("k").await.unwrap().unwrap();
        let log = entry.timestamps_or_empty();

        if decision.is_allowed() {
            assert!(log.len() <= 5);
        }
        assert!(log.iter().all(|&ts| ts + window_ms > now), "stale entry at {}", now);
    }
}

#[tokio::test]
async fn test_token_bucket_stays_within_capacity() {
    let storage = MemoryStorage::new();
    let algorithm = TokenBucket::new(3.0, 2.5);

    let mut now = 0;
    for i in 0..200u64 {
        // Irregular spacing, including long idle gaps.
        now += (i * 37) % 450;
        algorithm.check_and_record(&storage, "k", now).await.unwrap();
        let tokens = storage.get("k").await.unwrap().unwrap().tokens_or_default();
        assert!((0.0..=3.0).contains(&tokens), "tokens {} at {}", tokens, now);
    }
}

#[tokio::test]
async fn test_gcra_tat_is_monotone() {
    let storage = MemoryStorage::new();
    let algorithm = GCRA::new(Quota::per_second(4), 2);

    let mut last_tat = 0;
    for now in (0..3_000).step_by(45) {
        algorithm.check_and_record(&storage, "k", now).await.unwrap();
        let tat = storage.get("k").await.unwrap().unwrap().tat_or_default();
        assert!(tat >= last_tat);
        last_tat = tat;
    }
}

#[tokio::test]
async fn test_peek_is_idempotent() {
    let storage = MemoryStorage::new();
    let algorithms: Vec<AlgorithmConfig> = vec![
        FixedWindow::new(Quota::per_second(3)).into(),
        SlidingWindowCounter::new(Quota::per_second(3), 4).into(),
        SlidingWindowLog::new(Quota::per_second(3)).into(),
        GCRA::new(Quota::per_second(3), 1).into(),
        TokenBucket::new(3.0, 3.0).into(),
    ];

    for (i, algorithm) in algorithms.iter().enumerate() {
        let key = format!("k{}", i);
        for now in [0, 10, 20] {
            algorithm.check_and_record(&storage, &key, now).await.unwrap();
        }
        let first = algorithm.check(&storage, &key, 30).await.unwrap();
        let second = algorithm.check(&storage, &key, 30).await.unwrap();
        assert_eq!(first.is_allowed(), second.is_allowed(), "{}", algorithm.name());
        assert_eq!(first.retry_after_ms(), second.retry_after_ms(), "{}", algorithm.name());
        assert_eq!(first.info().remaining, second.info().remaining, "{}", algorithm.name());
    }
}

#[tokio::test]
async fn test_token_bucket_scenario() {
    let storage = MemoryStorage::new();
    let algorithm = TokenBucket::new(5.0, 1.67);

    for i in 1..=5 {
        let decision = algorithm.check_and_record(&storage, "k", 0).await.unwrap();
        assert!(decision.is_allowed(), "request {} should be allowed", i);
    }
    let tokens = storage.get("k").await.unwrap().unwrap().tokens_or_default();
    assert!(tokens.abs() < 1e-9);

    let decision = algorithm.check_and_record(&storage, "k", 0).await.unwrap();
    assert!(decision.is_denied());
    // 1 / 1.67 s
    assert!((598..=600).contains(&decision.retry_after_ms()));

    let decision = algorithm.check_and_record(&storage, "k", 1_000).await.unwrap();
    assert!(decision.is_allowed());
    let tokens = storage.get("k").await.unwrap().unwrap().tokens_or_default();
    assert!((tokens - 0.67).abs() < 1e-6);
}

#[tokio::test]
async fn test_fixed_window_boundary_burst_scenario() {
    let storage = MemoryStorage::new();
    let algorithm = FixedWindow::new(Quota::per_minute(100));

    for i in 1..=100 {
        let decision = algorithm.check_and_record(&storage, "k", 59_900).await.unwrap();
        assert!(decision.is_allowed(), "request {} should be allowed", i);
    }
    assert!(algorithm.check_and_record(&storage, "k", 59_950).await.unwrap().is_denied());

    // New window: the boundary burst admits again.
    let decision = algorithm.check_and_record(&storage, "k", 60_100).await.unwrap();
    assert!(decision.is_allowed());
}

#[tokio::test]
async fn test_separate_keys_independent() {
    let storage = MemoryStorage::new();
    let algorithm = GCRA::new(Quota::per_second(2), 1);

    for _ in 0..2 {
        algorithm.check_and_record(&storage, "user:1", 0).await.unwrap();
    }
    let decision = algorithm.check_and_record(&storage, "user:1", 0).await.unwrap();
    assert!(decision.is_denied(), "user:1 should be rate limited");

    let decision = algorithm.check_and_record(&storage, "user:2", 0).await.unwrap();
    assert!(decision.is_allowed(), "user:2 should be allowed");
}

#[tokio::test]
async fn test_clock_skew_never_refunds() {
    let storage = MemoryStorage::new();

    let bucket = TokenBucket::new(2.0, 1.0);
    bucket.check_and_record(&storage, "tb", 10_000).await.unwrap();
    bucket.check_and_record(&storage, "tb", 10_000).await.unwrap();
    // A caller with a lagging clock gets no tokens back.
    assert!(bucket.check_and_record(&storage, "tb", 5_000).await.unwrap().is_denied());

    let gcra = GCRA::new(Quota::per_second(1), 0);
    gcra.check_and_record(&storage, "gcra", 10_000).await.unwrap();
    let tat = storage.get("gcra").await.unwrap().unwrap().tat_or_default();
    assert!(gcra.check_and_record(&storage, "gcra", 5_000).await.unwrap().is_denied());
    assert_eq!(storage.get("gcra").await.unwrap().unwrap().tat_or_default(), tat);
}
