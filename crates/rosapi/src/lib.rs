//! Client for the RouterOS API protocol.
//!
//! Talks to the API service of network devices over TCP: word framing,
//! command sentences, tagged request multiplexing and login.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte stream abstraction (TCP, in-memory)
//! - [`word`]: length-prefixed words and charset transcoding
//! - [`message`]: requests, queries, responses and collections
//! - [`registry`]: response routing for shared connections (behind `session` feature)
//! - [`session`]: sessions, login and persistent connections (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use rosapi_transport::*;
}

/// Re-export word types.
pub mod word {
    pub use rosapi_word::*;
}

/// Re-export message types.
pub mod message {
    pub use rosapi_message::*;
}

/// Re-export registry types (requires `session` feature).
#[cfg(feature = "session")]
pub mod registry {
    pub use rosapi_registry::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use rosapi_session::*;
}

#[cfg(feature = "logging")]
pub mod logging;

pub use rosapi_message::{Query, QueryOp, Request, Response, ResponseCollection, ResponseType};
#[cfg(feature = "session")]
pub use rosapi_session::{connect, connect_persistent, Session, SessionConfig, SessionContext};
