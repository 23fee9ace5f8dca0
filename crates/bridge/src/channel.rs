//! Interception channel collaborator seam
//!
//! The channel endpoint runs outside the bridge's execution context (in
//! production a service-worker-like process), so the boundary is message
//! passing only: `send` for commands, `subscribe` for notices. No shared
//! memory is assumed on either side.

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::BridgeResult;
use crate::protocol::{ChannelCommand, ChannelNotice};

/// Message-passing interface to an interception endpoint.
#[async_trait]
pub trait InterceptionChannel: Send + Sync {
    /// Push a command to the endpoint.
    async fn send(&self, command: ChannelCommand) -> BridgeResult<()>;

    /// Subscribe to notices. Each call returns an independent stream.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ChannelNotice>;

    /// Resolve once the endpoint is ready to receive commands.
    async fn wait_ready(&self) -> BridgeResult<()> {
        Ok(())
    }

    /// Protocol version the endpoint reports, when known.
    fn reported_version(&self) -> Option<String> {
        None
    }
}

/// Persistence seam for the last-known endpoint protocol version.
///
/// Version bookkeeping is advisory; implementations log storage failures
/// instead of propagating them.
pub trait VersionStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn store(&self, version: &str);
}

/// In-memory version store, the default for embedded use
#[derive(Default)]
pub struct MemoryVersionStore {
    version: Mutex<Option<String>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(version: &str) -> Self {
        Self {
            version: Mutex::new(Some(version.to_string())),
        }
    }
}

impl VersionStore for MemoryVersionStore {
    fn load(&self) -> Option<String> {
        self.version.lock().clone()
    }

    fn store(&self, version: &str) {
        *self.version.lock() = Some(version.to_string());
    }
}

/// Version store persisted to a single file, surviving page reloads
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl VersionStore for FileVersionStore {
    fn load(&self) -> Option<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let version = contents.trim();
                (!version.is_empty()).then(|| version.to_string())
            }
            Err(_) => None,
        }
    }

    fn store(&self, version: &str) {
        if let Err(e) = std::fs::write(&self.path, version) {
            warn!("failed to persist endpoint version to {}: {}", self.path.display(), e);
        }
    }
}
