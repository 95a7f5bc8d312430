use std::sync::Arc;

use rosapi_transport::TcpTransport;
use rosapi_word::Communicator;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::context::SessionContext;
use crate::error::{Result, SessionError};
use crate::login::login;
use crate::session::Session;

/// Connect, log in and return a session owning the connection.
pub fn connect(config: &SessionConfig) -> Result<Session<TcpTransport>> {
    let mut session = Session::new(open(config)?);
    session.set_streaming_responses(config.streaming_responses);
    Ok(session)
}

/// Session on the context's connection for `config`, opening it if needed.
///
/// A reused connection is not logged in again.
pub fn connect_persistent(
    context: &Arc<SessionContext>,
    config: &SessionConfig,
) -> Result<Session<TcpTransport>> {
    let mut session = context.session_with(&config.connection_key(), || open(config))?;
    session.set_streaming_responses(config.streaming_responses);
    Ok(session)
}

impl SessionContext<TcpTransport> {
    /// Connect according to `config.persistent`.
    pub fn connect(self: &Arc<Self>, config: &SessionConfig) -> Result<Session<TcpTransport>> {
        if config.persistent {
            connect_persistent(self, config)
        } else {
            connect(config)
        }
    }
}

fn open(config: &SessionConfig) -> Result<Communicator<TcpTransport>> {
    debug!(host = %config.host, port = config.port, "connecting");
    let transport = TcpTransport::connect(&config.host, config.port, config.timeout)?;
    let mut com = Communicator::with_config(transport, config.word);

    if !login(&mut com, &config.username, &config.password, config.timeout)? {
        if let Err(err) = com.close() {
            warn!(error = %err, "close after rejected login failed");
        }
        return Err(SessionError::InvalidCredentials(config.username.clone()));
    }
    Ok(com)
}
