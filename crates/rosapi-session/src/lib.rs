//! Sessions over RouterOS API connections.
//!
//! This is the "just works" layer. Connect and log in, then send requests
//! synchronously or asynchronously by tag, with responses delivered to
//! buffers or callbacks. Sessions created through a [`SessionContext`]
//! share one connection per host, port and user.

pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod login;
pub mod session;

#[cfg(test)]
mod test_support;

pub use config::SessionConfig;
pub use connector::{connect, connect_persistent};
pub use context::SessionContext;
pub use error::{Result, SessionError};
pub use login::{challenge_response, login};
pub use session::{callback, Callback, RequestFilter, Session};
