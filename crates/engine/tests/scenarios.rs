//! End-to-end engine behavior against the in-memory counter store.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use quell_core::{BoxError, CompositeError, RequestSnapshot, RetryAfter, TooManyRequests};
use quell_engine::{Engine, EngineBuilder, EngineError, FnConfigLoader, run_cleanup};
use quell_rules::{
    CircuitBreaker, Config, FixedWindow, LimitMethod, RequestMatcher, Rule, Semaphore,
};
use quell_store::CounterStore;
use quell_store_memory::MemoryCounterStore;

fn fixed_window(permit_limit: u64, interval_seconds: u64) -> LimitMethod {
    LimitMethod::FixedWindow(FixedWindow {
        permit_limit,
        interval_seconds,
        should_throw_on_failures: false,
    })
}

fn api_rule(permit_limit: u64, interval_seconds: u64) -> Rule {
    Rule::new(
        RequestMatcher::for_uri("^/api").expect("pattern compiles"),
        fixed_window(permit_limit, interval_seconds),
    )
}

async fn build_engine(store: Arc<MemoryCounterStore>, config: Config) -> Engine {
    EngineBuilder::new()
        .store(store)
        .config(config)
        .build()
        .await
        .expect("engine should build")
}

fn api_request() -> RequestSnapshot {
    RequestSnapshot::new("GET", "/api/orders")
}

#[tokio::test]
async fn fixed_window_third_request_is_rejected() {
    let store = Arc::new(MemoryCounterStore::new());
    let config = Config::new("svc").with_rule(api_rule(2, 10));
    let engine = build_engine(store, config).await;

    let mut all_cleanup = Vec::new();
    let first = engine.evaluate(&api_request(), &mut all_cleanup).await.unwrap();
    let second = engine.evaluate(&api_request(), &mut all_cleanup).await.unwrap();
    let third = engine.evaluate(&api_request(), &mut all_cleanup).await.unwrap();

    assert!(!first[0].exceeded);
    assert!(!second[0].exceeded);
    assert!(third[0].exceeded);

    match &third[0].retry_after {
        RetryAfter::Seconds(secs) => {
            assert!((1..=10).contains(secs), "retry hint should point at the window end, got {secs}");
        }
        RetryAfter::At(_) => panic!("expected relative retry hint"),
    }
}

#[tokio::test(start_paused = true)]
async fn exceeded_request_is_admitted_once_the_window_turns() {
    let store = Arc::new(MemoryCounterStore::new());
    let rule = api_rule(2, 10).with_max_delay(Duration::from_secs(15));
    let config = Config::new("svc").with_rule(rule);
    let engine = build_engine(store, config).await;

    let mut cleanup = Vec::new();
    engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    engine.evaluate(&api_request(), &mut cleanup).await.unwrap();

    let started = tokio::time::Instant::now();
    let third = engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    let waited = started.elapsed();

    assert!(!third[0].exceeded, "third request should be admitted after waiting");
    assert!(
        waited >= Duration::from_secs(10),
        "admission cannot happen before the window turns, waited {waited:?}"
    );
    assert!(
        waited <= Duration::from_secs(13),
        "admission should happen shortly after the window turns, waited {waited:?}"
    );
    assert_eq!(engine.metrics().snapshot().delayed_admissions, 1);
}

#[tokio::test(start_paused = true)]
async fn delay_budget_exhaustion_returns_exceeded() {
    let store = Arc::new(MemoryCounterStore::new());
    let rule = api_rule(1, 100).with_max_delay(Duration::from_secs(2));
    let config = Config::new("svc").with_rule(rule);
    let engine = build_engine(store, config).await;

    let mut cleanup = Vec::new();
    engine.evaluate(&api_request(), &mut cleanup).await.unwrap();

    let started = tokio::time::Instant::now();
    let second = engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    let waited = started.elapsed();

    assert!(second[0].exceeded);
    assert!(waited >= Duration::from_secs(2), "budget should be used up, waited {waited:?}");
    assert!(
        waited <= Duration::from_secs(3),
        "return should come within one poll of the budget, waited {waited:?}"
    );
}

#[tokio::test]
async fn all_matching_rules_are_evaluated_and_cleanup_tracks_admissions() {
    let store = Arc::new(MemoryCounterStore::new());
    let config = Config::new("svc")
        .with_rule(api_rule(10, 60))
        .with_rule(api_rule(1, 60));
    let engine = build_engine(store, config).await;

    let mut first_cleanup = Vec::new();
    let first = engine.evaluate(&api_request(), &mut first_cleanup).await.unwrap();
    assert_eq!(first.len(), 2);
    assert!(first.iter().all(|r| !r.exceeded));
    assert_eq!(first_cleanup.len(), 2);

    let mut second_cleanup = Vec::new();
    let second = engine.evaluate(&api_request(), &mut second_cleanup).await.unwrap();
    assert_eq!(second.len(), 2, "both rules report even when one exceeds");
    assert!(!second[0].exceeded);
    assert!(second[1].exceeded);

    // Only the admitted match registers cleanup, and it points at the
    // admitted rule's counter.
    assert_eq!(second_cleanup.len(), 1);
    assert_eq!(
        Some(second_cleanup[0].counter()),
        second[0].counter.as_ref()
    );
}

#[tokio::test]
async fn whitelisted_requests_touch_nothing() {
    let store = Arc::new(MemoryCounterStore::new());
    let config = Config::new("svc")
        .with_rule(api_rule(1, 60))
        .with_whitelisted(RequestMatcher::for_uri("^/health").expect("pattern compiles"));
    let engine = build_engine(Arc::clone(&store), config).await;

    let health = RequestSnapshot::new("GET", "/health");
    for _ in 0..100 {
        let mut cleanup = Vec::new();
        let results = engine.evaluate(&health, &mut cleanup).await.unwrap();
        assert!(results.is_empty());
        assert!(cleanup.is_empty());
    }

    assert!(store.is_empty(), "no counter may be touched for whitelisted requests");
    assert_eq!(engine.metrics().snapshot().whitelisted, 100);
}

#[tokio::test]
async fn composite_downstream_throttle_signal_is_fused() {
    let store = Arc::new(MemoryCounterStore::new());
    let engine = build_engine(store, Config::new("svc")).await;

    let mut cleanup = Vec::new();
    let results = engine
        .evaluate_with_next(&api_request(), &mut cleanup, || async {
            let inner = TooManyRequests::from_header_value("5").expect("numeric value");
            let composite = CompositeError::new(vec![
                Box::new(std::io::Error::other("unrelated")) as BoxError,
                Box::new(inner) as BoxError,
            ]);
            Err(Box::new(composite) as BoxError)
        })
        .await
        .expect("throttle signal must not surface as an error");

    assert_eq!(results.len(), 1);
    assert!(results[0].exceeded);
    assert!(results[0].rule.is_none());
    assert_eq!(results[0].retry_after.header_value(), "5");
    assert_eq!(engine.metrics().snapshot().egress_throttled, 1);
}

#[tokio::test]
async fn direct_downstream_throttle_signal_is_fused_after_admissions() {
    let store = Arc::new(MemoryCounterStore::new());
    let config = Config::new("svc").with_rule(api_rule(10, 60));
    let engine = build_engine(store, config).await;

    let mut cleanup = Vec::new();
    let results = engine
        .evaluate_with_next(&api_request(), &mut cleanup, || async {
            Err(Box::new(TooManyRequests::new(RetryAfter::Seconds(7))) as BoxError)
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 2, "the admitted rule result is kept");
    assert!(!results[0].exceeded);
    assert!(results[1].exceeded);
    assert_eq!(results[1].retry_after.header_value(), "7");
}

#[tokio::test]
async fn unrecognized_continuation_failure_propagates() {
    let store = Arc::new(MemoryCounterStore::new());
    let engine = build_engine(store, Config::new("svc")).await;

    let mut cleanup = Vec::new();
    let err = engine
        .evaluate_with_next(&api_request(), &mut cleanup, || async {
            Err(Box::new(std::io::Error::other("boom")) as BoxError)
        })
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NextAction(_)));
}

#[tokio::test]
async fn exceeded_ingress_skips_the_continuation() {
    let store = Arc::new(MemoryCounterStore::new());
    let config = Config::new("svc").with_rule(api_rule(1, 60));
    let engine = build_engine(store, config).await;

    let mut cleanup = Vec::new();
    engine.evaluate(&api_request(), &mut cleanup).await.unwrap();

    let invoked = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&invoked);
    let results = engine
        .evaluate_with_next(&api_request(), &mut cleanup, move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

    assert!(results[0].exceeded);
    assert_eq!(invoked.load(Ordering::SeqCst), 0, "continuation must not run");
}

#[tokio::test(start_paused = true)]
async fn dynamic_reload_changes_admission_behavior() {
    let store = Arc::new(MemoryCounterStore::new());
    let permit = Arc::new(AtomicU64::new(1));

    let source = Arc::clone(&permit);
    let loader = FnConfigLoader::new(move || {
        let source = Arc::clone(&source);
        Box::pin(async move {
            Ok(Config::new("svc").with_rule(Rule::new(
                RequestMatcher::any(),
                LimitMethod::FixedWindow(FixedWindow {
                    permit_limit: source.load(Ordering::SeqCst),
                    interval_seconds: 60,
                    should_throw_on_failures: false,
                }),
            )))
        })
    })
    .with_reload_interval(Duration::from_secs(1));

    let engine = EngineBuilder::new()
        .store(Arc::clone(&store) as Arc<dyn CounterStore>)
        .loader(Arc::new(loader))
        .build()
        .await
        .expect("engine should build");

    let mut cleanup = Vec::new();
    let first = engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    let second = engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    assert!(!first[0].exceeded);
    assert!(second[0].exceeded, "limit 1 rejects the second request");

    // Raise the limit at the source; the next reload tick publishes it.
    permit.store(10, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;

    let third = engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    assert!(!third[0].exceeded, "admission should reflect the reloaded limit");
}

#[tokio::test(start_paused = true)]
async fn dispose_stops_reloading() {
    let store = Arc::new(MemoryCounterStore::new());
    let permit = Arc::new(AtomicU64::new(1));

    let source = Arc::clone(&permit);
    let loader = FnConfigLoader::new(move || {
        let source = Arc::clone(&source);
        Box::pin(async move {
            Ok(Config::new("svc").with_rule(Rule::new(
                RequestMatcher::any(),
                LimitMethod::FixedWindow(FixedWindow {
                    permit_limit: source.load(Ordering::SeqCst),
                    interval_seconds: 60,
                    should_throw_on_failures: false,
                }),
            )))
        })
    })
    .with_reload_interval(Duration::from_secs(1));

    let engine = EngineBuilder::new()
        .store(store)
        .loader(Arc::new(loader))
        .build()
        .await
        .expect("engine should build");

    engine.dispose();
    permit.store(10, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut cleanup = Vec::new();
    engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    let second = engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    assert!(
        second[0].exceeded,
        "disposed engine must keep the snapshot from before dispose"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn parallel_attempters_with_cost_admit_exactly_the_quotient() {
    let store = Arc::new(MemoryCounterStore::new());
    let rule = Rule::new(
        RequestMatcher::for_uri("^/api").expect("pattern compiles"),
        fixed_window(10, 60),
    )
    .with_cost_extractor(|_: &dyn quell_core::RequestProxy| 3);
    let config = Config::new("svc").with_rule(rule);
    let engine = Arc::new(build_engine(store, config).await);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let mut cleanup = Vec::new();
            let results = engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
            !results[0].exceeded
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.expect("task should not panic") {
            admitted += 1;
        }
    }

    // floor(10 / 3) = 3 requests fit the window, no matter the interleaving.
    assert_eq!(admitted, 3);
}

#[tokio::test]
async fn rule_position_does_not_change_counter_accuracy() {
    let matching = api_rule(5, 60);
    let non_matching = Rule::new(
        RequestMatcher::for_uri("^/elsewhere").expect("pattern compiles"),
        fixed_window(1, 60),
    );

    let store_a = Arc::new(MemoryCounterStore::new());
    let config_a = Config::new("svc")
        .with_rule(non_matching.clone())
        .with_rule(matching.clone());
    let engine_a = build_engine(Arc::clone(&store_a), config_a).await;

    let store_b = Arc::new(MemoryCounterStore::new());
    let config_b = Config::new("svc")
        .with_rule(matching)
        .with_rule(non_matching);
    let engine_b = build_engine(Arc::clone(&store_b), config_b).await;

    for _ in 0..7 {
        let mut cleanup = Vec::new();
        let a = engine_a.evaluate(&api_request(), &mut cleanup).await.unwrap();
        let b = engine_b.evaluate(&api_request(), &mut cleanup).await.unwrap();
        assert_eq!(a.len(), 1, "non-matching rules contribute no result");
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].exceeded, b[0].exceeded);
    }

    assert_eq!(store_a.len(), 1, "only the matching rule touches the store");
    assert_eq!(store_b.len(), 1);
}

#[tokio::test]
async fn semaphore_cleanup_releases_capacity() {
    let store = Arc::new(MemoryCounterStore::new());
    let rule = Rule::new(
        RequestMatcher::any(),
        LimitMethod::Semaphore(Semaphore {
            permit_limit: 1,
            timeout_seconds: 20,
            should_throw_on_failures: false,
        }),
    );
    let config = Config::new("svc").with_rule(rule);
    let engine = build_engine(store, config).await;

    let mut first_cleanup = Vec::new();
    let first = engine.evaluate(&api_request(), &mut first_cleanup).await.unwrap();
    assert!(!first[0].exceeded);

    let mut second_cleanup = Vec::new();
    let second = engine.evaluate(&api_request(), &mut second_cleanup).await.unwrap();
    assert!(second[0].exceeded, "the single permit is held");
    assert!(second_cleanup.is_empty(), "no admission, no cleanup");

    run_cleanup(first_cleanup).await;

    let mut third_cleanup = Vec::new();
    let third = engine.evaluate(&api_request(), &mut third_cleanup).await.unwrap();
    assert!(!third[0].exceeded, "cleanup must release the permit");
}

#[tokio::test]
async fn failed_continuation_feeds_the_circuit_breaker() {
    let store = Arc::new(MemoryCounterStore::new());
    let rule = Rule::new(
        RequestMatcher::any(),
        LimitMethod::CircuitBreaker(CircuitBreaker {
            permit_limit: 1,
            interval_seconds: 60,
            trial_interval_seconds: 60,
            should_throw_on_failures: false,
        }),
    );
    let config = Config::new("svc").with_rule(rule);
    let engine = build_engine(store, config).await;

    // Admitted request whose downstream throttles: the fused signal marks
    // the request failed, and cleanup records the failure.
    let mut cleanup = Vec::new();
    let results = engine
        .evaluate_with_next(&api_request(), &mut cleanup, || async {
            Err(Box::new(TooManyRequests::new(RetryAfter::Seconds(3))) as BoxError)
        })
        .await
        .unwrap();
    assert!(results.iter().any(|r| r.exceeded));
    run_cleanup(cleanup).await;

    // One failure reaches the limit: the breaker is open. The first request
    // in the trial window is the probe, the next is rejected.
    let mut cleanup = Vec::new();
    let trial = engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    assert!(!trial[0].exceeded);

    let mut cleanup = Vec::new();
    let rejected = engine.evaluate(&api_request(), &mut cleanup).await.unwrap();
    assert!(rejected[0].exceeded, "breaker should reject while open");
}
