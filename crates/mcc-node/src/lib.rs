//! Node runtime for the Cinnabar cache cluster.
//!
//! This is the thin integration layer: it reads configuration from the
//! environment, binds one multicast socket, wires the replica state
//! machine to it behind a single mutation-serialization lock, runs the
//! heartbeat / sweep / reconciliation timers, and exposes the public
//! get/put/delete API plus an orderly shutdown hook.
//!
//! # Quick start
//!
//! ```no_run
//! use mcc_node::{Node, NodeConfig, UdpMulticastTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mcc_node::NodeError> {
//!     let config = NodeConfig::from_env()?;
//!     let transport = UdpMulticastTransport::bind(config.group, config.hops).await?;
//!     let node = Node::spawn(config, Arc::new(transport)).await?;
//!
//!     node.put(b"greeting", b"hello".to_vec()).await?;
//!     let value = node.get(b"greeting");
//!     assert_eq!(value, Some(b"hello".to_vec()));
//!
//!     node.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod transport;

pub use config::{NodeConfig, NodeConfigBuilder};
pub use error::NodeError;
pub use logging::{init_logging, LoggingGuard};
pub use runtime::Node;
pub use transport::{GroupTransport, MemoryGroup, MemoryGroupTransport, UdpMulticastTransport};
