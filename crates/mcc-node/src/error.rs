//! Error types for the node runtime.
//!
//! Only startup failures are fatal to a node; everything that can go
//! wrong in normal operation (loss, staleness, capacity, unknown keys,
//! silent peers) is handled inside the coherence machinery and never
//! surfaces here.

use mcc_core::StoreError;
use mcc_gossip::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    /// The multicast socket could not be set up; the node cannot join.
    #[error("socket bind failed: {0}")]
    Bind(#[source] std::io::Error),

    #[error("datagram send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
