//! Bridge + endpoint flows: define, fire, wait, redefine, clear

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;

use testdeck_bridge::{
    BridgeError, CapturedBody, LocalInterceptor, MemoryVersionStore, MockBridge, RuleSpec,
    VersionStore,
};
use testdeck_common::wait::PollOptions;

fn bridge_over(endpoint: &LocalInterceptor) -> MockBridge {
    MockBridge::new(Arc::new(endpoint.clone())).with_settle_delay(Duration::from_millis(1))
}

#[tokio::test]
async fn defined_rule_fires_and_wait_resolves_with_captured_body() {
    let endpoint = LocalInterceptor::new();
    let bridge = bridge_over(&endpoint);
    bridge.init_mocking().await.unwrap();

    bridge
        .define_rule(
            "joke",
            RuleSpec::get("https://api.x/random").with_response(json!({"value": "A"})),
        )
        .await;

    endpoint
        .handle_request(
            "GET",
            "https://api.x/random?lang=en",
            Some("application/json"),
            Bytes::from_static(br#"{"seed": 5}"#),
        )
        .await
        .expect("rule should match");

    let rule = bridge.await_rule_fired("joke").await.unwrap();
    assert!(rule.executed);
    assert_eq!(rule.request, Some(CapturedBody::Json(json!({"seed": 5}))));
    assert_eq!(rule.hit_count, 1);
    assert_eq!(bridge.rule_hit_count("joke"), 1);
}

#[tokio::test]
async fn redefining_an_alias_waits_against_the_new_definition() {
    let endpoint = LocalInterceptor::new();
    let bridge = bridge_over(&endpoint);
    bridge.init_mocking().await.unwrap();

    bridge
        .define_rule(
            "joke",
            RuleSpec::get("https://api.x/random").with_response(json!({"value": "A"})),
        )
        .await;
    endpoint
        .handle_request("GET", "https://api.x/random", None, Bytes::new())
        .await
        .unwrap();
    let first = bridge.await_rule_fired("joke").await.unwrap();
    assert_eq!(first.spec.response, json!({"value": "A"}));

    // Second definition replaces the first and resets execution state
    bridge
        .define_rule(
            "joke",
            RuleSpec::get("https://api.x/random").with_response(json!({"value": "B"})),
        )
        .await;
    assert!(!bridge.rule("joke").unwrap().executed);

    let response = endpoint
        .handle_request("GET", "https://api.x/random", None, Bytes::new())
        .await
        .unwrap();
    assert_eq!(response.body, Some(json!({"value": "B"})));

    let second = bridge.await_rule_fired("joke").await.unwrap();
    assert_eq!(second.spec.response, json!({"value": "B"}));
    assert_eq!(second.hit_count, 1);
}

#[tokio::test]
async fn await_many_preserves_request_order() {
    let endpoint = LocalInterceptor::new();
    let bridge = bridge_over(&endpoint);
    bridge.init_mocking().await.unwrap();

    bridge.define_rule("users", RuleSpec::get("/users")).await;
    bridge.define_rule("items", RuleSpec::get("/items")).await;

    // Fire in the opposite order of the upcoming wait
    endpoint
        .handle_request("GET", "https://host/items", None, Bytes::new())
        .await
        .unwrap();
    endpoint
        .handle_request("GET", "https://host/users", None, Bytes::new())
        .await
        .unwrap();

    let rules = bridge.await_rules_fired(&["users", "items"]).await.unwrap();
    assert_eq!(rules[0].alias, "users");
    assert_eq!(rules[1].alias, "items");
}

#[tokio::test]
async fn await_many_propagates_the_first_failure() {
    let endpoint = LocalInterceptor::new();
    let bridge = bridge_over(&endpoint);
    bridge.init_mocking().await.unwrap();

    bridge.define_rule("known", RuleSpec::get("/known")).await;

    match bridge.await_rules_fired(&["known", "missing"]).await {
        Err(BridgeError::RuleNotFound { alias }) => assert_eq!(alias, "missing"),
        other => panic!("expected RuleNotFound, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn clear_all_rules_clears_both_sides() {
    let endpoint = LocalInterceptor::new();
    let bridge = bridge_over(&endpoint);
    bridge.init_mocking().await.unwrap();

    bridge.define_rule("a", RuleSpec::get("/a")).await;
    endpoint
        .handle_request("GET", "https://host/a", None, Bytes::new())
        .await
        .unwrap();
    bridge.await_rule_fired("a").await.unwrap();

    bridge.clear_all_rules().await;

    assert_eq!(bridge.rule_hit_count("a"), 0);
    assert_eq!(endpoint.rule_count(), 0);
    assert!(endpoint
        .handle_request("GET", "https://host/a", None, Bytes::new())
        .await
        .is_none());
}

#[tokio::test]
async fn repeated_init_does_not_double_process_notices() {
    // Legacy endpoints omit authoritative counts, so a duplicated listener
    // would be visible as a double increment
    let endpoint = LocalInterceptor::new().with_legacy_notices();
    let bridge = bridge_over(&endpoint);

    bridge.init_mocking().await.unwrap();
    bridge.init_mocking().await.unwrap();

    bridge.define_rule("once", RuleSpec::get("/once")).await;
    endpoint
        .handle_request("GET", "https://host/once", None, Bytes::new())
        .await
        .unwrap();

    let rule = bridge.await_rule_fired("once").await.unwrap();
    assert_eq!(rule.hit_count, 1);
}

#[tokio::test]
async fn version_change_is_recorded_on_init() {
    let endpoint = LocalInterceptor::new();
    let versions = Arc::new(MemoryVersionStore::with_version("1"));
    let bridge = MockBridge::new(Arc::new(endpoint))
        .with_settle_delay(Duration::from_millis(1))
        .with_version_store(versions.clone());

    bridge.init_mocking().await.unwrap();

    // Endpoint reports the current protocol; the stale persisted version is
    // replaced (the warning itself is advisory)
    assert_eq!(versions.load(), Some(testdeck_common::PROTOCOL_VERSION.to_string()));
}

#[tokio::test]
async fn first_install_records_the_reported_version() {
    let endpoint = LocalInterceptor::new();
    let versions = Arc::new(MemoryVersionStore::new());
    let bridge = MockBridge::new(Arc::new(endpoint))
        .with_settle_delay(Duration::from_millis(1))
        .with_version_store(versions.clone());

    bridge.init_mocking().await.unwrap();

    assert_eq!(versions.load(), Some(testdeck_common::PROTOCOL_VERSION.to_string()));
}

#[tokio::test]
async fn delayed_response_does_not_delay_the_executed_notice() {
    let endpoint = LocalInterceptor::new();
    let bridge = bridge_over(&endpoint);
    bridge.init_mocking().await.unwrap();

    bridge
        .define_rule("slow", RuleSpec::get("/slow").with_delay_ms(30_000))
        .await;

    let request = {
        let endpoint = endpoint.clone();
        tokio::spawn(async move {
            endpoint
                .handle_request("GET", "https://host/slow", None, Bytes::new())
                .await
        })
    };

    // The wait resolves while the response itself is still held back
    let rule = bridge
        .await_rule_fired_with("slow", PollOptions::new(50, Duration::from_millis(20)))
        .await
        .unwrap();
    assert!(rule.executed);
    assert!(!request.is_finished());
    request.abort();
}

#[tokio::test]
async fn wait_timeout_and_not_found_are_distinct_errors() {
    let endpoint = LocalInterceptor::new();
    let bridge = bridge_over(&endpoint);
    bridge.init_mocking().await.unwrap();

    bridge.define_rule("quiet", RuleSpec::get("/quiet")).await;

    let timeout = bridge
        .await_rule_fired_with("quiet", PollOptions::new(2, Duration::from_millis(1)))
        .await
        .unwrap_err();
    let not_found = bridge.await_rule_fired("never-defined").await.unwrap_err();

    assert!(matches!(timeout, BridgeError::WaitTimeout { .. }));
    assert!(matches!(not_found, BridgeError::RuleNotFound { .. }));
    assert_ne!(timeout.to_string(), not_found.to_string());
}
