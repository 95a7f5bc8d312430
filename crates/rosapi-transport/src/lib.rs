//! Byte-stream transport collaborators for the API protocol.
//!
//! This is the lowest layer of rosapi. The word layer only needs a
//! [`Transport`]: a blocking `Read + Write` stream that can also report
//! whether data is awaiting and whether it still accepts writes.
//!
//! - [`TcpTransport`] connects to a live service.
//! - [`MemoryTransport`] replays a scripted peer, for tests and offline use.

pub mod error;
pub mod memory;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use memory::MemoryTransport;
pub use tcp::TcpTransport;
pub use traits::Transport;
