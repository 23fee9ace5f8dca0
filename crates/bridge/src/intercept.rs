//! In-process interception endpoint
//!
//! A reference implementation of the channel contract, used by integration
//! tests and by hosts that want deterministic mocking without a separate
//! worker process. It matches requests the way an installed endpoint script
//! must: method case-insensitively, URL by substring unless the rule is a
//! pattern, with bodies decoded by content type. The EXECUTED notice fires
//! immediately on match; an artificial delay defers only the response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use testdeck_common::PROTOCOL_VERSION;

use crate::channel::InterceptionChannel;
use crate::error::BridgeResult;
use crate::protocol::{ChannelCommand, ChannelNotice, RuleDefinition};
use crate::rule::CapturedBody;

/// Response substituted for a matched request
#[derive(Debug, Clone, PartialEq)]
pub struct MockedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
}

struct ActiveRule {
    def: RuleDefinition,
    /// Compiled once at registration; None for substring rules and for
    /// patterns that failed to compile
    pattern: Option<Regex>,
}

#[derive(Default)]
struct InterceptorState {
    /// Insertion order decides which rule wins when several match
    rules: Vec<ActiveRule>,
    hits: HashMap<String, u64>,
    subscribers: Vec<mpsc::UnboundedSender<ChannelNotice>>,
}

/// In-process channel endpoint.
///
/// Clones share state, so the same instance can be handed to a
/// `MockBridge` and to the code path that feeds it requests.
#[derive(Clone, Default)]
pub struct LocalInterceptor {
    state: Arc<RwLock<InterceptorState>>,
    /// Omit authoritative hit counts from notices, like pre-v2 endpoints
    legacy_notices: bool,
}

impl LocalInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behave like an endpoint that predates authoritative hit counts
    pub fn with_legacy_notices(mut self) -> Self {
        self.legacy_notices = true;
        self
    }

    /// Match one outgoing request against the active rules.
    ///
    /// On a match the EXECUTED notice is published immediately, then any
    /// configured delay elapses before the response is returned, so waiters
    /// observe the match before the request's own future resolves. Returns
    /// None when no rule matches and the request should pass through.
    pub async fn handle_request(
        &self,
        method: &str,
        url: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Option<MockedResponse> {
        let (alias, spec) = {
            let state = self.state.read();
            let matched = state
                .rules
                .iter()
                .find(|rule| rule_matches(rule, method, url))?;
            (matched.def.alias.clone(), matched.def.spec.clone())
        };

        let hit_count = {
            let mut state = self.state.write();
            let hits = state.hits.entry(alias.clone()).or_insert(0);
            *hits += 1;
            *hits
        };

        let captured = decode_body(content_type, &body);
        debug!("request {} {} matched rule \"{}\"", method, url, alias);
        self.publish(ChannelNotice::Executed {
            alias,
            request: captured,
            hit_count: (!self.legacy_notices).then_some(hit_count),
        });

        if spec.delay_ms > 0 {
            sleep(Duration::from_millis(spec.delay_ms)).await;
        }

        Some(MockedResponse {
            status: spec.status,
            headers: spec.resolved_headers(),
            body: spec.resolved_body(),
        })
    }

    /// Number of active rules (endpoint side)
    pub fn rule_count(&self) -> usize {
        self.state.read().rules.len()
    }

    fn publish(&self, notice: ChannelNotice) {
        let mut state = self.state.write();
        state
            .subscribers
            .retain(|tx| tx.send(notice.clone()).is_ok());
    }

    fn upsert(&self, def: RuleDefinition) {
        let pattern = if def.spec.is_pattern {
            match Regex::new(&def.spec.url) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("rule \"{}\" has an invalid URL pattern: {}", def.alias, e);
                    None
                }
            }
        } else {
            None
        };

        let mut state = self.state.write();
        state.hits.remove(&def.alias);
        let active = ActiveRule { def, pattern };
        match state
            .rules
            .iter_mut()
            .find(|r| r.def.alias == active.def.alias)
        {
            Some(existing) => *existing = active,
            None => state.rules.push(active),
        }
    }
}

fn rule_matches(rule: &ActiveRule, method: &str, url: &str) -> bool {
    if !rule.def.spec.method.eq_ignore_ascii_case(method) {
        return false;
    }
    if rule.def.spec.is_pattern {
        rule.pattern.as_ref().is_some_and(|re| re.is_match(url))
    } else {
        url.contains(&rule.def.spec.url)
    }
}

/// Decode a request body the way the channel contract requires: JSON parsed
/// to structured data, form payloads to a flat key/value map, octet and
/// image payloads kept binary, everything else as text.
fn decode_body(content_type: Option<&str>, body: &Bytes) -> CapturedBody {
    if body.is_empty() {
        return CapturedBody::Empty;
    }

    let content_type = content_type.unwrap_or("").to_ascii_lowercase();

    if content_type.contains("application/json") {
        return match serde_json::from_slice(body) {
            Ok(value) => CapturedBody::Json(value),
            Err(_) => CapturedBody::Text(String::from_utf8_lossy(body).into_owned()),
        };
    }

    if content_type.contains("application/x-www-form-urlencoded") {
        return CapturedBody::Form(decode_form(&String::from_utf8_lossy(body)));
    }

    if content_type.starts_with("image/") || content_type.contains("application/octet-stream") {
        return CapturedBody::Binary(body.to_vec());
    }

    CapturedBody::Text(String::from_utf8_lossy(body).into_owned())
}

fn decode_form(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key), percent_decode(value))
        })
        .collect()
}

/// Minimal percent decoding for form payloads; '+' is a space per the
/// urlencoded rules. Malformed escapes pass through verbatim.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let escape = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                match escape {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[async_trait]
impl InterceptionChannel for LocalInterceptor {
    async fn send(&self, command: ChannelCommand) -> BridgeResult<()> {
        match command {
            ChannelCommand::AddRule { rule, .. } => self.upsert(rule),
            ChannelCommand::ClearRules { .. } => {
                let mut state = self.state.write();
                state.rules.clear();
                state.hits.clear();
            }
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.write().subscribers.push(tx);
        rx
    }

    fn reported_version(&self) -> Option<String> {
        Some(PROTOCOL_VERSION.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleSpec;
    use serde_json::json;
    use test_case::test_case;

    async fn endpoint_with(alias: &str, spec: RuleSpec) -> LocalInterceptor {
        let endpoint = LocalInterceptor::new();
        endpoint
            .send(ChannelCommand::AddRule {
                rule: RuleDefinition {
                    alias: alias.to_string(),
                    spec,
                },
                version: PROTOCOL_VERSION.to_string(),
            })
            .await
            .unwrap();
        endpoint
    }

    #[test_case("get"; "lowercase")]
    #[test_case("GET"; "uppercase")]
    #[test_case("GeT"; "mixed case")]
    #[tokio::test]
    async fn method_matching_is_case_insensitive(method: &str) {
        let endpoint = endpoint_with("r", RuleSpec::get("/api/items")).await;
        let hit = endpoint
            .handle_request(method, "https://host/api/items", None, Bytes::new())
            .await;
        assert!(hit.is_some());
    }

    #[tokio::test]
    async fn substring_rule_does_not_match_other_urls() {
        let endpoint = endpoint_with("r", RuleSpec::get("/api/items")).await;
        let miss = endpoint
            .handle_request("GET", "https://host/api/users", None, Bytes::new())
            .await;
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn pattern_rule_matches_the_absolute_url() {
        let endpoint =
            endpoint_with("r", RuleSpec::get(r"https://[^/]+/api/items/\d+").as_pattern()).await;

        assert!(endpoint
            .handle_request("GET", "https://host/api/items/42", None, Bytes::new())
            .await
            .is_some());
        assert!(endpoint
            .handle_request("GET", "https://host/api/items/latest", None, Bytes::new())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn wrong_method_is_a_miss() {
        let endpoint = endpoint_with("r", RuleSpec::post("/api/items")).await;
        let miss = endpoint
            .handle_request("GET", "https://host/api/items", None, Bytes::new())
            .await;
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn json_body_is_captured_structured() {
        let endpoint = endpoint_with("r", RuleSpec::post("/api/items")).await;
        let mut notices = endpoint.subscribe();

        endpoint
            .handle_request(
                "POST",
                "https://host/api/items",
                Some("application/json; charset=utf-8"),
                Bytes::from_static(br#"{"name":"widget"}"#),
            )
            .await
            .unwrap();

        let ChannelNotice::Executed { request, hit_count, .. } = notices.try_recv().unwrap();
        assert_eq!(request, CapturedBody::Json(json!({"name": "widget"})));
        assert_eq!(hit_count, Some(1));
    }

    #[tokio::test]
    async fn form_body_is_captured_as_flat_map() {
        let endpoint = endpoint_with("r", RuleSpec::post("/login")).await;
        let mut notices = endpoint.subscribe();

        endpoint
            .handle_request(
                "POST",
                "https://host/login",
                Some("application/x-www-form-urlencoded"),
                Bytes::from_static(b"user=jo+ann&token=a%2Fb"),
            )
            .await
            .unwrap();

        let ChannelNotice::Executed { request, .. } = notices.try_recv().unwrap();
        let expected = HashMap::from([
            ("user".to_string(), "jo ann".to_string()),
            ("token".to_string(), "a/b".to_string()),
        ]);
        assert_eq!(request, CapturedBody::Form(expected));
    }

    #[tokio::test]
    async fn binary_body_is_kept_binary() {
        let endpoint = endpoint_with("r", RuleSpec::post("/upload")).await;
        let mut notices = endpoint.subscribe();

        let payload = Bytes::from_static(&[0x89, 0x50, 0x4e, 0x47]);
        endpoint
            .handle_request("POST", "https://host/upload", Some("image/png"), payload)
            .await
            .unwrap();

        let ChannelNotice::Executed { request, .. } = notices.try_recv().unwrap();
        assert_eq!(request, CapturedBody::Binary(vec![0x89, 0x50, 0x4e, 0x47]));
    }

    #[tokio::test]
    async fn empty_body_is_captured_as_empty() {
        let endpoint = endpoint_with("r", RuleSpec::get("/ping")).await;
        let mut notices = endpoint.subscribe();

        endpoint
            .handle_request("GET", "https://host/ping", None, Bytes::new())
            .await
            .unwrap();

        let ChannelNotice::Executed { request, .. } = notices.try_recv().unwrap();
        assert_eq!(request, CapturedBody::Empty);
    }

    #[tokio::test]
    async fn bodyless_status_response_has_no_body() {
        let endpoint = endpoint_with(
            "r",
            RuleSpec::get("/gone").with_status(204).with_response(json!("x")),
        )
        .await;

        let response = endpoint
            .handle_request("GET", "https://host/gone", None, Bytes::new())
            .await
            .unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(response.body, None);
        assert!(response.headers.is_empty());
    }

    #[tokio::test]
    async fn clear_rules_empties_the_endpoint() {
        let endpoint = endpoint_with("r", RuleSpec::get("/api")).await;
        endpoint
            .send(ChannelCommand::ClearRules {
                version: PROTOCOL_VERSION.to_string(),
            })
            .await
            .unwrap();

        assert_eq!(endpoint.rule_count(), 0);
        assert!(endpoint
            .handle_request("GET", "https://host/api", None, Bytes::new())
            .await
            .is_none());
    }

    #[test]
    fn percent_decoding_handles_malformed_sequences() {
        assert_eq!(percent_decode("a%2Fb"), "a/b");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
