use std::time::Duration;

use rosapi_message::{MessageError, Request, Response, ResponseType};
use rosapi_transport::Transport;
use rosapi_word::{Communicator, WordError};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};

/// Log in with the challenge-response handshake.
///
/// Sends `/login`, reads the hex challenge from `ret`, then answers with
/// `"00"` followed by the hex MD5 of a zero byte, the password and the
/// decoded challenge. Returns `Ok(false)` when the device rejects the
/// credentials. Protocol-level failures are reported as
/// [`SessionError::ServiceIncompatible`], since they most likely mean the
/// endpoint is not an API service at all.
pub fn login<T: Transport>(
    com: &mut Communicator<T>,
    username: &str,
    password: &str,
    timeout: Option<Duration>,
) -> Result<bool> {
    match exchange(com, username, password, timeout) {
        Ok(accepted) => {
            if accepted {
                info!(username, "logged in");
            } else {
                warn!(username, "login rejected");
            }
            Ok(accepted)
        }
        Err(err) if is_incompatible(&err) => Err(SessionError::ServiceIncompatible(Box::new(err))),
        Err(err) => Err(err),
    }
}

fn exchange<T: Transport>(
    com: &mut Communicator<T>,
    username: &str,
    password: &str,
    timeout: Option<Duration>,
) -> Result<bool> {
    Request::new("/login")?.send(com)?;
    let challenge = Response::receive(com, false, timeout)?;
    let challenge = match challenge.argument("ret") {
        Some(ret) => hex::decode(ret.as_bytes())?,
        None => Vec::new(),
    };
    debug!(challenge_len = challenge.len(), "received login challenge");

    let password = com.encode_outgoing(password.as_bytes()).into_owned();
    let mut request = Request::new("/login")?
        .with_argument("name", username)?
        .with_argument("response", challenge_response(&password, &challenge))?;
    request.send(com)?;

    let mut response = Response::receive(com, false, timeout)?;
    if response.is(ResponseType::Final) {
        return Ok(response.argument("ret").is_none());
    }
    while !response.is(ResponseType::Final) && !response.is(ResponseType::Fatal) {
        response = Response::receive(com, false, timeout)?;
    }
    Ok(false)
}

/// `"00"` followed by `md5(0x00 ‖ password ‖ challenge)` in lowercase hex.
pub fn challenge_response(password: &[u8], challenge: &[u8]) -> String {
    let mut context = md5::Context::new();
    context.consume([0u8]);
    context.consume(password);
    context.consume(challenge);
    format!("00{:x}", context.compute())
}

fn is_incompatible(err: &SessionError) -> bool {
    let word = match err {
        SessionError::MalformedChallenge(_) => return true,
        SessionError::Message(MessageError::UnknownResponseType(_)) => return true,
        SessionError::Message(MessageError::Word(word)) | SessionError::Word(word) => word,
        _ => return false,
    };
    matches!(
        word,
        WordError::NoData
            | WordError::UnsupportedControlByte(_)
            | WordError::UnsupportedLength { .. }
            | WordError::InvalidLength(_)
            | WordError::LengthBeyondScheme(_)
    )
}
