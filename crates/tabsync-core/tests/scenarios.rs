//! End-to-end behavior of the sync engine through the public API.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use tabsync_core::{
    ActiveSignal, CacheStore, Classification, ErrorKind, FetchError, LoadOptions, LoadOutcome,
    ManualClock, RetryExecutor, RetryPolicy, SyncConfig, SyncEvent, ViewController, ViewSpec,
    ViewState,
};

#[test]
fn test_entry_expires_after_ttl() {
    let clock = ManualClock::new();
    let mut cache = CacheStore::new(100, Arc::new(clock.clone()));

    cache.set("overview", json!({"a": 1}), Duration::from_millis(2000));
    assert_eq!(cache.get("overview"), Some(&json!({"a": 1})));

    clock.advance(Duration::from_millis(2100));
    assert_eq!(cache.get("overview"), None);
}

#[test]
fn test_sixth_insert_evicts_earliest_expiring() {
    let clock = ManualClock::new();
    let mut cache = CacheStore::new(5, Arc::new(clock.clone()));

    for i in 1..=6 {
        cache.set(&format!("k{}", i), json!(i), Duration::from_millis(1000));
        clock.advance(Duration::from_millis(10));
    }

    assert_eq!(cache.len_valid(), 5);
    assert_eq!(cache.get("k1"), None);
    for i in 2..=6 {
        assert_eq!(cache.get(&format!("k{}", i)), Some(&json!(i)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_retried_with_backoff() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let fetch = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n < 3 {
                Err(FetchError::timeout("upstream slow"))
            } else {
                Ok("ok")
            }
        }
    };
    let policy = RetryPolicy::default()
        .with_max_attempts(3)
        .with_base_delay(Duration::from_millis(100));

    let start = Instant::now();
    let result = RetryExecutor::run(fetch, &policy, &ActiveSignal::detached()).await;

    assert_eq!(result, Ok("ok"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(start.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_controller_load_retries_timeouts() {
    let controller = ViewController::new(SyncConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let fetcher = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n < 3 {
                Err(FetchError::timeout("upstream slow"))
            } else {
                Ok(json!("ok"))
            }
        }
    };
    let policy = RetryPolicy::default()
        .with_max_attempts(3)
        .with_base_delay(Duration::from_millis(100));

    let start = Instant::now();
    let outcome = controller
        .load("overview", &fetcher, LoadOptions::default().with_retry(policy))
        .await;

    assert_eq!(outcome, Ok(LoadOutcome::Fetched(json!("ok"))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(!controller.is_loading("overview"));
    assert_eq!(controller.cached("overview"), Some(json!("ok")));
}

#[tokio::test(start_paused = true)]
async fn test_controller_load_retries_after_attempt_timeout() {
    let controller = ViewController::new(SyncConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let fetcher = move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n < 3 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok::<_, FetchError>(json!({"attempt": n}))
        }
    };
    let policy = RetryPolicy::default()
        .with_max_attempts(3)
        .with_base_delay(Duration::from_millis(100))
        .with_timeout(Duration::from_secs(1));

    let start = Instant::now();
    let outcome = controller
        .load("overview", &fetcher, LoadOptions::default().with_retry(policy))
        .await;

    assert_eq!(outcome, Ok(LoadOutcome::Fetched(json!({"attempt": 3}))));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Two 1s timeouts plus 100ms and 200ms of backoff
    assert!(start.elapsed() >= Duration::from_millis(2300));
    assert!(!controller.is_loading("overview"));
}

#[tokio::test(start_paused = true)]
async fn test_unauthorized_fails_immediately() {
    let controller = ViewController::new(SyncConfig::default());
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let fetcher = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<Value, _>(FetchError::from_status(401, "token expired")) }
    };

    let start = Instant::now();
    let err = controller
        .load("overview", &fetcher, LoadOptions::default())
        .await
        .expect_err("unauthorized");

    assert_eq!(err.kind(), Some(ErrorKind::Auth));
    match &err {
        tabsync_core::SyncError::Fetch(classified) => {
            assert_eq!(classified.classification, Classification::Fatal);
            assert_eq!(classified.attempts, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_background_poll_keeps_unsaved_meal_choice() {
    let controller = ViewController::new(SyncConfig::default());
    let mut events = controller.take_events().expect("event receiver");

    let remote = Arc::new(Mutex::new(json!({"breakfast": false, "availed": {"breakfast": false}})));
    let source = remote.clone();
    let fetcher = move || {
        let value = source.lock().expect("remote lock").clone();
        async move { Ok::<_, FetchError>(value) }
    };
    let spec = ViewSpec::new("mealRegistration", Duration::from_secs(120), Arc::new(fetcher))
        .poll_every(Duration::from_secs(60))
        .editable("mealRegistration", &["breakfast", "lunch", "dinner"]);
    controller.register(spec).expect("register");

    assert_eq!(
        controller.enter("mealRegistration").await,
        Ok(LoadOutcome::Fetched(json!({"breakfast": false, "availed": {"breakfast": false}})))
    );
    controller
        .edit_local("mealRegistration", "breakfast", json!(true))
        .expect("edit");
    assert!(controller.is_dirty("mealRegistration"));

    *remote.lock().expect("remote lock") = json!({"breakfast": false, "availed": {"breakfast": true}});
    tokio::time::sleep(Duration::from_millis(60_100)).await;

    assert_eq!(
        controller.displayed("mealRegistration"),
        Some(json!({"breakfast": true, "availed": {"breakfast": true}}))
    );
    assert_eq!(controller.status("mealRegistration").state, ViewState::Display);

    let mut last = None;
    while let Ok(event) = events.try_recv() {
        last = Some(event);
    }
    assert_eq!(
        last,
        Some(SyncEvent::Updated {
            view: "mealRegistration".to_string(),
            payload: json!({"breakfast": true, "availed": {"breakfast": true}}),
            silent: true,
        })
    );

    controller.teardown();
}
