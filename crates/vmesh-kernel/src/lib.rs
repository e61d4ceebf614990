//! The coordination kernel: wire frames, transport discipline and the node
//! orchestrator that ties causal delivery, failure detection and leader
//! election together over an abstract transport.
//!
//! ```no_run
//! use vmesh_core::NodeId;
//! use vmesh_kernel::{Kernel, KernelConfig, MemoryTransport};
//!
//! # async fn demo() -> Result<(), vmesh_kernel::KernelError> {
//! let transport = MemoryTransport::new(NodeId(1));
//! let (kernel, mut deliveries) = Kernel::start(NodeId(1), transport, KernelConfig::default());
//! kernel.join().await?;
//! kernel.publish(serde_json::json!({"credits": 25})).await?;
//! if let Some(event) = deliveries.recv().await {
//!     println!("delivered {} from {}", event.id, event.origin);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discipline;
pub mod error;
pub mod kernel;
pub mod transport;
pub mod wire;

pub use config::{KernelConfig, KernelConfigBuilder};
pub use discipline::Discipline;
pub use error::KernelError;
pub use kernel::Kernel;
pub use transport::{memory_network, MemoryTransport, Transport, TransportError};
pub use wire::Frame;
