//! The mock rule bridge
//!
//! Single source of truth for active mock rules on the page side, and the
//! synchronization point with the interception channel endpoint. Rules are
//! upserted by alias, pushed to the endpoint, and marked executed when the
//! endpoint's EXECUTED notices arrive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use parking_lot::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use testdeck_common::wait::{poll_until, PollOptions, WaitError};
use testdeck_common::PROTOCOL_VERSION;

use crate::channel::{InterceptionChannel, MemoryVersionStore, VersionStore};
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{ChannelCommand, ChannelNotice, RuleDefinition};
use crate::rule::{MockRule, RuleSpec};

/// Settle delay after pushing a rule, bridging the asynchronous registration
/// on the endpoint side without making callers poll
const SETTLE_DELAY_MS: u64 = 100;

/// Default wait budget for `await_rule_fired`: 20 × 50 ms tolerates a normal
/// endpoint round-trip without false timeouts
const DEFAULT_WAIT_ATTEMPTS: usize = 20;
const DEFAULT_WAIT_INTERVAL_MS: u64 = 50;

/// Page-side mock rule store and channel synchronization point.
///
/// Cheap to clone; clones share the same rule store and channel.
#[derive(Clone)]
pub struct MockBridge {
    rules: Arc<RwLock<HashMap<String, MockRule>>>,
    channel: Option<Arc<dyn InterceptionChannel>>,
    versions: Arc<dyn VersionStore>,
    listening: Arc<AtomicBool>,
    settle_delay: Duration,
}

impl MockBridge {
    /// Bridge backed by a channel endpoint
    pub fn new(channel: Arc<dyn InterceptionChannel>) -> Self {
        Self {
            rules: Arc::new(RwLock::new(HashMap::new())),
            channel: Some(channel),
            versions: Arc::new(MemoryVersionStore::new()),
            listening: Arc::new(AtomicBool::new(false)),
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
        }
    }

    /// Bridge for hosts without any interception support. Mocking degrades
    /// to a no-op instead of blocking test execution.
    pub fn detached() -> Self {
        Self {
            rules: Arc::new(RwLock::new(HashMap::new())),
            channel: None,
            versions: Arc::new(MemoryVersionStore::new()),
            listening: Arc::new(AtomicBool::new(false)),
            settle_delay: Duration::from_millis(SETTLE_DELAY_MS),
        }
    }

    /// Replace the version store (persisted across page reloads in real
    /// deployments)
    pub fn with_version_store(mut self, versions: Arc<dyn VersionStore>) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Register with the interception channel. Idempotent: the first call
    /// waits for the endpoint, checks its protocol version against the
    /// persisted last-known one, and starts the notice listener; later calls
    /// log a warning and do nothing, so notices are never double-processed.
    ///
    /// A missing channel is not an error; the bridge logs that mocking is
    /// unsupported and every mutation becomes local-only.
    pub async fn init_mocking(&self) -> BridgeResult<()> {
        if self.listening.swap(true, Ordering::SeqCst) {
            warn!("mocking already initialized; ignoring repeated init");
            return Ok(());
        }

        let Some(channel) = &self.channel else {
            info!("no interception channel in this host; mocking is disabled");
            return Ok(());
        };

        channel.wait_ready().await?;
        self.negotiate_version(channel.reported_version());

        let mut notices = channel.subscribe();
        let bridge = self.clone();
        tokio::spawn(async move {
            while let Some(notice) = notices.recv().await {
                bridge.apply_notice(notice);
            }
            debug!("interception channel closed; notice listener stopped");
        });

        Ok(())
    }

    fn negotiate_version(&self, reported: Option<String>) {
        let Some(reported) = reported else { return };
        match self.versions.load() {
            None => {
                // First install counts as up to date
                self.versions.store(&reported);
            }
            Some(previous) if previous != reported => {
                warn!(
                    "interception endpoint protocol changed ({} -> {}); \
                     run `testdeck install` to refresh the endpoint script",
                    previous, reported
                );
                self.versions.store(&reported);
            }
            Some(_) => {}
        }
    }

    /// Upsert a rule by alias and push it to the endpoint.
    ///
    /// Replacing an existing alias resets its executed/hit state. The call
    /// returns after a short settle delay; it never fails, even without a
    /// channel, so test authors need no environment detection.
    pub async fn define_rule(&self, alias: &str, spec: RuleSpec) {
        let rule = MockRule::new(alias, spec.clone());
        if self.rules.write().insert(alias.to_string(), rule).is_some() {
            debug!("replacing mock rule \"{}\"", alias);
        }

        if let Some(channel) = &self.channel {
            let command = ChannelCommand::AddRule {
                rule: RuleDefinition {
                    alias: alias.to_string(),
                    spec,
                },
                version: PROTOCOL_VERSION.to_string(),
            };
            if let Err(e) = channel.send(command).await {
                warn!("failed to push rule \"{}\" to the channel: {}", alias, e);
            }
        }

        sleep(self.settle_delay).await;
    }

    /// Wait until the named rule has matched a request.
    ///
    /// Fails immediately with [`BridgeError::RuleNotFound`] when the alias
    /// was never defined, and with [`BridgeError::WaitTimeout`] once the
    /// retry budget is exhausted. Resolves to a snapshot of the executed
    /// rule including the captured request body.
    pub async fn await_rule_fired(&self, alias: &str) -> BridgeResult<MockRule> {
        self.await_rule_fired_with(
            alias,
            PollOptions::new(
                DEFAULT_WAIT_ATTEMPTS,
                Duration::from_millis(DEFAULT_WAIT_INTERVAL_MS),
            ),
        )
        .await
    }

    /// `await_rule_fired` with an explicit retry budget
    pub async fn await_rule_fired_with(
        &self,
        alias: &str,
        options: PollOptions,
    ) -> BridgeResult<MockRule> {
        if !self.rules.read().contains_key(alias) {
            return Err(BridgeError::RuleNotFound {
                alias: alias.to_string(),
            });
        }

        let rules = self.rules.clone();
        let probe_alias = alias.to_string();
        poll_until(alias, options, move || {
            rules
                .read()
                .get(&probe_alias)
                .filter(|rule| rule.executed)
                .cloned()
        })
        .await
        .map_err(|e| match e {
            WaitError::Timeout {
                attempts,
                elapsed_ms,
                ..
            } => BridgeError::WaitTimeout {
                alias: alias.to_string(),
                attempts,
                elapsed_ms,
            },
        })
    }

    /// Concurrently wait for several aliases; results come back in request
    /// order and the first failure propagates.
    pub async fn await_rules_fired(&self, aliases: &[&str]) -> BridgeResult<Vec<MockRule>> {
        try_join_all(aliases.iter().map(|alias| self.await_rule_fired(alias))).await
    }

    /// Drop every rule, reset hit counters, and tell the endpoint to do the
    /// same.
    pub async fn clear_all_rules(&self) {
        self.rules.write().clear();

        if let Some(channel) = &self.channel {
            let command = ChannelCommand::ClearRules {
                version: PROTOCOL_VERSION.to_string(),
            };
            if let Err(e) = channel.send(command).await {
                warn!("failed to clear rules on the channel: {}", e);
            }
        }
    }

    /// Snapshot of one rule
    pub fn rule(&self, alias: &str) -> Option<MockRule> {
        self.rules.read().get(alias).cloned()
    }

    /// Hit count for an alias; unknown aliases count zero
    pub fn rule_hit_count(&self, alias: &str) -> u64 {
        self.rules.read().get(alias).map_or(0, |r| r.hit_count)
    }

    /// Independent snapshot of every hit counter. Mutating the returned map
    /// does not affect the bridge.
    pub fn all_hit_counts(&self) -> HashMap<String, u64> {
        self.rules
            .read()
            .iter()
            .map(|(alias, rule)| (alias.clone(), rule.hit_count))
            .collect()
    }

    /// Apply an inbound notice from the channel.
    ///
    /// Unknown aliases are ignored: the endpoint may still report activity
    /// for rules the page has already cleared. Without an authoritative
    /// count the counter increments by one per notice, which silently
    /// diverges if the endpoint ever batches or drops notices. Known
    /// accuracy limitation, not corrected here.
    pub fn apply_notice(&self, notice: ChannelNotice) {
        let ChannelNotice::Executed {
            alias,
            request,
            hit_count,
        } = notice;

        let mut rules = self.rules.write();
        match rules.get_mut(&alias) {
            Some(rule) => {
                rule.executed = true;
                rule.request = Some(request);
                rule.hit_count = hit_count.unwrap_or(rule.hit_count + 1);
                debug!("rule \"{}\" executed (hits: {})", alias, rule.hit_count);
            }
            None => {
                debug!("EXECUTED notice for unknown alias \"{}\" ignored", alias);
            }
        }
    }
}
