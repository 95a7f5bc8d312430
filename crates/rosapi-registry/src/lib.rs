//! Response ownership for sessions sharing one persistent connection.
//!
//! Several sessions may multiplex over the same physical connection. Any of
//! them may read the next response off the wire, so responses are routed
//! by an ownership prefix on their tag into per-instance buffers kept in a
//! [`SharedStore`]. Counters live in an explicit [`RegistryContext`]
//! rather than in process-wide statics.

pub mod registry;
pub mod store;

pub use registry::{Registry, RegistryContext, OWNERSHIP_SEPARATOR};
pub use store::{Segment, SharedStore};
