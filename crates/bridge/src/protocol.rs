//! Interception channel wire protocol
//!
//! Commands flow from the bridge to the channel endpoint; notices flow back.
//! Every outbound command carries the protocol version so an out-of-date
//! endpoint script can be detected (advisory only, never enforced).

use serde::{Deserialize, Serialize};

use crate::rule::{CapturedBody, RuleSpec};

/// Definition half of a rule as it travels to the endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub alias: String,

    #[serde(flatten)]
    pub spec: RuleSpec,
}

/// Bridge → channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelCommand {
    #[serde(rename = "ADD_RULE")]
    AddRule { rule: RuleDefinition, version: String },

    #[serde(rename = "CLEAR_RULES")]
    ClearRules { version: String },
}

/// Channel → bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelNotice {
    /// A rule matched a real outgoing request. `hit_count` is the endpoint's
    /// authoritative counter; legacy endpoints omit it and the bridge falls
    /// back to incrementing by one.
    #[serde(rename = "EXECUTED")]
    Executed {
        alias: String,
        request: CapturedBody,
        #[serde(rename = "hitCount", default, skip_serializing_if = "Option::is_none")]
        hit_count: Option<u64>,
    },
}
