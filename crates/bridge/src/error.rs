//! Error types for the mock bridge

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The alias was never defined. Distinct from a timeout so authors can
    /// tell "never registered" from "registered but never hit".
    #[error("no mock rule registered for alias \"{alias}\"")]
    RuleNotFound { alias: String },

    #[error("mock rule \"{alias}\" was not executed after {attempts} attempts ({elapsed_ms} ms)")]
    WaitTimeout {
        alias: String,
        attempts: usize,
        elapsed_ms: u64,
    },

    #[error("interception channel error: {0}")]
    Channel(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
