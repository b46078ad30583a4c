//! Errors seen by managed callers.

use crate::Status;
use crate::handle::ResolveError;
use std::time::Duration;

/// Failure of a bridge operation on the managed side.
///
/// Never crosses into the native layer; trampolines convert it to a
/// [`Status`] first.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A native call returned a non-OK status.
    #[error("native bus call failed: {0}")]
    Native(Status),
    /// The managed object behind a context token no longer exists.
    #[error(transparent)]
    TargetGone(#[from] ResolveError),
    /// No completion arrived within the wait bound.
    #[error("no completion within {0:?}")]
    Timeout(Duration),
    /// A value could not be converted to or from a bus argument.
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// The native status this error carries, if it came from the bus.
    pub fn status(&self) -> Option<Status> {
        match self {
            BridgeError::Native(status) => Some(*status),
            _ => None,
        }
    }
}
