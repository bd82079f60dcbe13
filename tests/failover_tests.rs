mod support;

use provider_resilience::{
    CapabilityType, CircuitStatus, ErrorContext, ErrorKind, ExecuteOptions, ProviderFailure,
    ResilienceConfig, ResilienceEngine, ResilienceError,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{ok_body, register, server_error, test_config, ScriptedProvider};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn failing_primary_fails_over_to_secondary() {
    let engine = ResilienceEngine::builder(ResilienceConfig::default())
        .build()
        .expect("engine");
    let a = Arc::new(ScriptedProvider::failing(server_error()));
    let b = Arc::new(ScriptedProvider::succeeding(ok_body()));
    register(&engine, "a", 1, a.clone()).await;
    register(&engine, "b", 2, b.clone()).await;

    let response = engine
        .execute(CapabilityType::Inference, json!({ "prompt": "hi" }))
        .await
        .expect("served by b");
    assert_eq!(response, json!({ "ok": true }));

    let log = engine.error_log().recent(10).await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, ErrorKind::Server);
    assert_eq!(log[0].provider_id(), Some("a"));

    let provider_a = engine.registry().get("a").await.expect("a registered");
    assert_eq!(provider_a.circuit().consecutive_failures().await, 1);
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert!(engine.coordinator().history().await.is_empty());
}

#[tokio::test]
async fn lower_priority_candidates_are_not_touched_after_success() {
    let engine = ResilienceEngine::builder(ResilienceConfig::default())
        .build()
        .expect("engine");
    let first = Arc::new(ScriptedProvider::failing(server_error()));
    let second = Arc::new(ScriptedProvider::succeeding(json!({ "from": 2 })));
    let third = Arc::new(ScriptedProvider::succeeding(json!({ "from": 3 })));
    register(&engine, "p3", 3, third.clone()).await;
    register(&engine, "p1", 1, first.clone()).await;
    register(&engine, "p2", 2, second.clone()).await;

    let response = engine
        .execute(CapabilityType::Inference, json!({}))
        .await
        .expect("served");
    assert_eq!(response, json!({ "from": 2 }));
    assert_eq!(engine.error_log().len().await, 1);
    assert_eq!(third.calls(), 0);
}

#[tokio::test]
async fn equal_priorities_keep_registration_order() {
    let engine = ResilienceEngine::builder(test_config()).build().expect("engine");
    let first = Arc::new(ScriptedProvider::succeeding(json!({ "from": "first" })));
    let second = Arc::new(ScriptedProvider::succeeding(json!({ "from": "second" })));
    register(&engine, "first", 5, first.clone()).await;
    register(&engine, "second", 5, second.clone()).await;

    for _ in 0..3 {
        let response = engine
            .execute(CapabilityType::Inference, json!({}))
            .await
            .expect("served");
        assert_eq!(response, json!({ "from": "first" }));
    }
    assert_eq!(second.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_call_returns_aggregate_error() {
    let engine = ResilienceEngine::builder(test_config()).build().expect("engine");
    register(&engine, "a", 1, Arc::new(ScriptedProvider::failing(server_error()))).await;
    register(
        &engine,
        "b",
        2,
        Arc::new(ScriptedProvider::failing(ProviderFailure::Timeout {
            message: "read timed out".to_string(),
        })),
    )
    .await;

    let error = engine
        .execute(CapabilityType::Inference, json!({}))
        .await
        .unwrap_err();
    match &error {
        ResilienceError::AllProvidersFailed {
            capability,
            failures,
        } => {
            assert_eq!(*capability, CapabilityType::Inference);
            let ids: Vec<&str> = failures.iter().map(|f| f.provider_id.as_str()).collect();
            assert_eq!(ids, vec!["a", "b"]);
            assert!(failures.iter().all(|f| f.attempts == 1 && f.skipped.is_none()));
            assert_eq!(
                failures[1].last_error.as_ref().map(|r| r.kind),
                Some(ErrorKind::Network)
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(error.user_message().contains("inference"));
}

#[tokio::test(start_paused = true)]
async fn last_candidate_spends_the_retry_budget() {
    let mut config = test_config();
    config.registry.default_retry.max_retries = 2;
    let engine = ResilienceEngine::builder(config).build().expect("engine");
    let a = Arc::new(ScriptedProvider::failing(server_error()));
    let b = Arc::new(
        ScriptedProvider::succeeding(ok_body()).with_script([Err(server_error()), Err(server_error())]),
    );
    register(&engine, "a", 1, a.clone()).await;
    register(&engine, "b", 2, b.clone()).await;

    let response = engine
        .execute(CapabilityType::Inference, json!({}))
        .await
        .expect("b succeeds on its third attempt");
    assert_eq!(response, ok_body());
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn open_circuit_skips_provider_until_cooldown_elapses() {
    let mut config = test_config();
    config.provider_defaults.circuit_breaker.failure_threshold = 2;
    config.provider_defaults.circuit_breaker.initial_cooldown_ms = 1_000;
    let engine = ResilienceEngine::builder(config).build().expect("engine");
    let a = Arc::new(
        ScriptedProvider::succeeding(json!({ "from": "a" }))
            .with_script([Err(server_error()), Err(server_error())]),
    );
    let b = Arc::new(ScriptedProvider::succeeding(json!({ "from": "b" })));
    register(&engine, "a", 1, a.clone()).await;
    register(&engine, "b", 2, b.clone()).await;

    for _ in 0..3 {
        let response = engine
            .execute(CapabilityType::Inference, json!({}))
            .await
            .expect("served by b");
        assert_eq!(response, json!({ "from": "b" }));
    }
    assert_eq!(a.calls(), 2);
    let status = engine.provider_status("a").await.expect("status");
    assert_eq!(status.circuit, CircuitStatus::Open);
    assert!(!status.healthy);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    let response = engine
        .execute(CapabilityType::Inference, json!({}))
        .await
        .expect("served by a");
    assert_eq!(response, json!({ "from": "a" }));
    let status = engine.provider_status("a").await.expect("status");
    assert_eq!(status.circuit, CircuitStatus::Closed);
    assert!(status.healthy);
}

#[tokio::test]
async fn reported_rate_limit_deprioritizes_provider() {
    let engine = ResilienceEngine::builder(test_config()).build().expect("engine");
    let a = Arc::new(ScriptedProvider::succeeding(json!({ "from": "a" })));
    let b = Arc::new(ScriptedProvider::succeeding(json!({ "from": "b" })));
    register(&engine, "a", 1, a.clone()).await;
    register(&engine, "b", 2, b.clone()).await;

    let record = engine
        .report(
            &ProviderFailure::RateLimited {
                message: "quota exceeded".to_string(),
                retry_after_ms: Some(30_000),
            },
            ErrorContext::new().with_provider("a"),
        )
        .await;
    assert_eq!(record.kind, ErrorKind::RateLimit);

    let response = engine
        .execute(CapabilityType::Inference, json!({}))
        .await
        .expect("served");
    assert_eq!(response, json!({ "from": "b" }));
    assert_eq!(a.calls(), 0);
    assert!(engine.provider_status("a").await.expect("status").deprioritized);
}

#[tokio::test]
async fn rate_limited_candidate_is_deprioritized_after_failover() {
    let engine = ResilienceEngine::builder(test_config()).build().expect("engine");
    let a = Arc::new(ScriptedProvider::failing(ProviderFailure::status(429, "slow down")));
    let b = Arc::new(ScriptedProvider::succeeding(json!({ "from": "b" })));
    register(&engine, "a", 1, a.clone()).await;
    register(&engine, "b", 2, b.clone()).await;

    let response = engine
        .execute(CapabilityType::Inference, json!({}))
        .await
        .expect("served by b");
    assert_eq!(response, json!({ "from": "b" }));

    let history = engine.coordinator().history().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].strategy_id, "failover-rate-limited");
    assert!(engine.provider_status("a").await.expect("status").deprioritized);

    let response = engine
        .execute(CapabilityType::Inference, json!({}))
        .await
        .expect("served by b");
    assert_eq!(response, json!({ "from": "b" }));
    assert_eq!(a.calls(), 1);
}

#[tokio::test]
async fn disabled_providers_are_not_candidates() {
    let engine = ResilienceEngine::builder(test_config()).build().expect("engine");
    let a = Arc::new(ScriptedProvider::succeeding(json!({ "from": "a" })));
    let b = Arc::new(ScriptedProvider::succeeding(json!({ "from": "b" })));
    register(&engine, "a", 1, a.clone()).await;
    register(&engine, "b", 2, b.clone()).await;

    engine.registry().set_enabled("a", false).await.expect("known id");
    let response = engine
        .execute(CapabilityType::Inference, json!({}))
        .await
        .expect("served");
    assert_eq!(response, json!({ "from": "b" }));

    engine.registry().set_priority("b", 10).await.expect("known id");
    engine.registry().set_enabled("a", true).await.expect("known id");
    let response = engine
        .execute(CapabilityType::Inference, json!({}))
        .await
        .expect("served");
    assert_eq!(response, json!({ "from": "a" }));
}

#[tokio::test]
async fn unknown_capability_is_a_configuration_error() {
    let engine = ResilienceEngine::builder(test_config()).build().expect("engine");
    register(&engine, "a", 1, Arc::new(ScriptedProvider::succeeding(ok_body()))).await;
    let error = engine
        .execute(CapabilityType::Knowledge, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        ResilienceError::NoProviders {
            capability: CapabilityType::Knowledge
        }
    ));
}

#[tokio::test]
async fn cancelled_call_is_not_dispatched() {
    let engine = ResilienceEngine::builder(test_config()).build().expect("engine");
    let a = Arc::new(ScriptedProvider::succeeding(ok_body()));
    register(&engine, "a", 1, a.clone()).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let error = engine
        .execute_with(
            CapabilityType::Inference,
            json!({}),
            ExecuteOptions::default().with_cancel(cancel),
        )
        .await
        .unwrap_err();
    assert!(matches!(error, ResilienceError::Cancelled { .. }));
    assert_eq!(a.calls(), 0);
    assert!(engine.coordinator().history().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn deregistration_does_not_interrupt_in_flight_calls() {
    let engine = Arc::new(ResilienceEngine::builder(test_config()).build().expect("engine"));
    let slow = Arc::new(ScriptedProvider::succeeding(ok_body()).with_latency(Duration::from_millis(200)));
    register(&engine, "slow", 1, slow.clone()).await;

    let in_flight = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.execute(CapabilityType::Inference, json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.deregister_provider("slow").await.expect("deregister");

    let response = in_flight.await.expect("join").expect("in-flight call completes");
    assert_eq!(response, ok_body());
    assert!(matches!(
        engine.execute(CapabilityType::Inference, json!({})).await,
        Err(ResilienceError::NoProviders { .. })
    ));
    assert!(matches!(
        engine.deregister_provider("slow").await,
        Err(ResilienceError::UnknownProvider { .. })
    ));
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let engine = ResilienceEngine::builder(test_config()).build().expect("engine");
    register(&engine, "a", 1, Arc::new(ScriptedProvider::succeeding(ok_body()))).await;
    let result = engine
        .register_provider(
            engine.descriptor("a", CapabilityType::Storage, 1),
            Arc::new(ScriptedProvider::succeeding(ok_body())),
        )
        .await;
    assert!(matches!(result, Err(ResilienceError::DuplicateProvider { .. })));
}
