//! Mock rule types
//!
//! A rule describes one request to intercept and the response to substitute.
//! Rules are keyed by alias; registering a second rule under the same alias
//! replaces the first and resets its execution state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Statuses that forbid a response body
pub const BODYLESS_STATUSES: [u16; 3] = [204, 205, 304];

pub fn is_bodyless(status: u16) -> bool {
    BODYLESS_STATUSES.contains(&status)
}

fn default_status() -> u16 {
    200
}

/// Immutable definition half of a mock rule, as supplied by the test author.
///
/// Wire field names follow the channel protocol (`isPattern`, `delay`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    /// HTTP method, matched case-insensitively
    pub method: String,

    /// URL matcher: substring match unless `is_pattern`, then a regex
    /// compiled against the absolute request URL
    pub url: String,

    #[serde(default, rename = "isPattern")]
    pub is_pattern: bool,

    /// Response payload substituted for a matched request
    #[serde(default)]
    pub response: serde_json::Value,

    #[serde(default = "default_status")]
    pub status: u16,

    /// Explicit response headers. When absent, a JSON content-type is
    /// assumed unless the status forbids a body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,

    /// Artificial delay in milliseconds before the response is released.
    /// The EXECUTED notification is not delayed.
    #[serde(default, rename = "delay")]
    pub delay_ms: u64,
}

impl RuleSpec {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            is_pattern: false,
            response: serde_json::Value::Null,
            status: default_status(),
            headers: None,
            delay_ms: 0,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn with_response(mut self, response: serde_json::Value) -> Self {
        self.response = response;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn as_pattern(mut self) -> Self {
        self.is_pattern = true;
        self
    }

    /// Headers the channel should attach to the mocked response
    pub fn resolved_headers(&self) -> HashMap<String, String> {
        match &self.headers {
            Some(headers) => headers.clone(),
            None if is_bodyless(self.status) => HashMap::new(),
            None => HashMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
        }
    }

    /// Body the channel should attach: bodyless statuses suppress the
    /// configured response unless explicit headers were supplied
    pub fn resolved_body(&self) -> Option<serde_json::Value> {
        if is_bodyless(self.status) && self.headers.is_none() {
            None
        } else {
            Some(self.response.clone())
        }
    }
}

/// Request body captured by the channel, decoded according to content type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CapturedBody {
    Json(serde_json::Value),
    Form(HashMap<String, String>),
    Binary(Vec<u8>),
    Text(String),
    Empty,
}

/// A mock rule together with its mutable execution state.
///
/// Only `MockBridge::define_rule` and the inbound notification handler
/// mutate a rule after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockRule {
    pub alias: String,

    #[serde(flatten)]
    pub spec: RuleSpec,

    /// Set once the channel reports a matching request
    pub executed: bool,

    /// Body of the matched request, once executed
    pub request: Option<CapturedBody>,

    /// Number of times the rule matched
    pub hit_count: u64,
}

impl MockRule {
    pub fn new(alias: impl Into<String>, spec: RuleSpec) -> Self {
        Self {
            alias: alias.into(),
            spec,
            executed: false,
            request: None,
            hit_count: 0,
        }
    }
}
