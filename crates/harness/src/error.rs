//! Error types for the harness

use thiserror::Error;

use crate::registry::NodeId;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("no test node with id {0:?}")]
    NodeNotFound(NodeId),

    #[error("node {0:?} is a suite, not a test")]
    NotATest(NodeId),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
