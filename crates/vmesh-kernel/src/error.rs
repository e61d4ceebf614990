//! Kernel error taxonomy.
//!
//! Transient transport failures and protocol garbage are logged and dropped
//! at the call sites, never fatal; the variants here are what surfaces to
//! callers of the kernel's own operations.

use crate::transport::TransportError;
use thiserror::Error;
use vmesh_core::NodeId;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no acknowledgment from {peer} after {attempts} attempts")]
    AckTimeout { peer: NodeId, attempts: u32 },

    #[error("kernel is shutting down")]
    ShuttingDown,
}
