use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rosapi_message::{Request, Response, ResponseCollection, ResponseType};
use rosapi_registry::Registry;
use rosapi_transport::Transport;
use rosapi_word::Communicator;
use tracing::{debug, trace, warn};

use crate::context::SessionContext;
use crate::error::{Result, SessionError};

/// Handler invoked for every response to a tagged request.
///
/// Returning `true` cancels the request. The session is passed back in so
/// the handler can issue further requests.
pub type Callback<T> = Box<dyn FnMut(&Response, &mut Session<T>) -> bool + Send>;

/// Box a closure as a [`Callback`].
pub fn callback<T, F>(f: F) -> Callback<T>
where
    T: Transport,
    F: FnMut(&Response, &mut Session<T>) -> bool + Send + 'static,
{
    Box::new(f)
}

/// Which kind of tracking [`Session::is_request_active`] looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestFilter {
    Callback,
    Buffer,
    #[default]
    All,
}

struct PersistentLink<T> {
    context: Arc<SessionContext<T>>,
    key: String,
}

/// Tagged request multiplexer over one API connection.
///
/// Each tagged request is tracked either by a buffer, drained with
/// [`Session::extract_new_responses`], or by a [`Callback`]. A session built
/// with a [`Registry`] shares its connection with other sessions: outgoing
/// tags are prefixed with the registry's ownership tag and responses read
/// on behalf of other sessions are parked in their buffers.
pub struct Session<T> {
    com: Arc<Mutex<Communicator<T>>>,
    registry: Option<Registry>,
    link: Option<PersistentLink<T>>,
    pending: usize,
    buffers: HashMap<String, Vec<Response>>,
    callbacks: HashMap<String, Callback<T>>,
    // Tags whose callback is running, with responses that arrived meanwhile.
    running: HashMap<String, VecDeque<Response>>,
    streaming: bool,
}

impl<T: Transport> Session<T> {
    /// Session owning a logged-in connection.
    pub fn new(com: Communicator<T>) -> Self {
        Self::from_shared(Arc::new(Mutex::new(com)), None)
    }

    /// Session over a connection other sessions may use too.
    ///
    /// Pass a [`Registry`] whenever the connection is actually shared.
    pub fn from_shared(com: Arc<Mutex<Communicator<T>>>, registry: Option<Registry>) -> Self {
        Self {
            com,
            registry,
            link: None,
            pending: 0,
            buffers: HashMap::new(),
            callbacks: HashMap::new(),
            running: HashMap::new(),
            streaming: false,
        }
    }

    pub(crate) fn with_link(mut self, context: Arc<SessionContext<T>>, key: String) -> Self {
        self.link = Some(PersistentLink { context, key });
        self
    }

    /// Send a tagged request without waiting for its responses.
    ///
    /// Without a callback, responses are buffered until extracted.
    pub fn send_async(&mut self, request: Request, callback: Option<Callback<T>>) -> Result<()> {
        let tag = match request.tag() {
            Some(tag) if !tag.is_empty() => tag.to_string(),
            _ => return Err(SessionError::TagRequired),
        };
        if self.is_request_active(&tag, RequestFilter::All) {
            return Err(SessionError::TagNotUnique(tag));
        }

        self.send(request)?;
        match callback {
            Some(callback) => {
                self.callbacks.insert(tag, callback);
            }
            None => {
                self.buffers.insert(tag, Vec::new());
            }
        }
        Ok(())
    }

    /// Send a request and wait for all of its responses.
    pub fn send_sync(&mut self, mut request: Request) -> Result<ResponseCollection> {
        let tag = request
            .tag()
            .filter(|tag| !tag.is_empty())
            .map(str::to_string);
        match tag {
            Some(_) => self.send_async(request, None)?,
            None => {
                request.set_tag(None);
                self.send(request)?;
            }
        }
        self.complete_request(tag.as_deref())
    }

    /// A request that fails validation is not sent and changes nothing. A
    /// failure while writing leaves a partial sentence on the wire, so it
    /// drops every tracked request and closes the connection.
    fn send(&mut self, mut request: Request) -> Result<()> {
        if let Some(registry) = &self.registry {
            if request.tag().is_some() || !registry.is_tagless_mode_owner() {
                let tag = format!("{}{}", registry.ownership_tag(), request.tag().unwrap_or(""));
                request.set_tag(Some(tag));
            }
        }

        let sent = {
            let mut com = self.com.lock();
            request.verify(&*com)?;
            request.send(&mut *com)
        };
        if let Err(err) = sent {
            warn!(error = %err, command = request.command(), "send failed, abandoning pending requests");
            self.abandon();
            return Err(err.into());
        }
        self.pending += 1;
        Ok(())
    }

    /// Wait for a request to finish and return what it produced.
    ///
    /// With `None`, dispatches until an untagged FINAL arrives (or nothing
    /// is pending) and returns the untagged responses. With a tag, returns
    /// everything buffered for it up to and including its FINAL. A FATAL
    /// ends the wait and is included in the result.
    pub fn complete_request(&mut self, tag: Option<&str>) -> Result<ResponseCollection> {
        let mut result = ResponseCollection::default();
        let Some(tag) = tag else {
            while self.pending > 0 {
                let response = self.dispatch_next_response(None)?;
                if response.tag().is_some() {
                    continue;
                }
                let done = response.is(ResponseType::Final) || response.is(ResponseType::Fatal);
                result.push(response);
                if done {
                    break;
                }
            }
            return Ok(result);
        };

        result.append(self.extract_new_responses(Some(tag))?);
        while self.is_request_active(tag, RequestFilter::All) {
            // Waiting on a tag from inside its own callback: its FINAL is queued.
            if self
                .running
                .get(tag)
                .and_then(VecDeque::back)
                .is_some_and(|r| r.is(ResponseType::Final))
            {
                break;
            }
            let response = self.dispatch_next_response(None)?;
            if response.is(ResponseType::Fatal) {
                result.push(response);
                break;
            }
            if response.tag() == Some(tag) && self.is_request_active(tag, RequestFilter::Buffer) {
                result.append(self.extract_new_responses(Some(tag))?);
            }
        }
        Ok(result)
    }

    /// Drain responses buffered so far.
    ///
    /// A tag tracked by a callback yields nothing. A buffered tag is forgotten
    /// once its FINAL has been drained. `None` drains every buffered tag.
    pub fn extract_new_responses(&mut self, tag: Option<&str>) -> Result<ResponseCollection> {
        let Some(tag) = tag else {
            let tags: Vec<String> = self.buffers.keys().cloned().collect();
            let mut result = ResponseCollection::default();
            for tag in tags {
                result.append(self.extract_new_responses(Some(&tag))?);
            }
            return Ok(result);
        };

        if self.is_request_active(tag, RequestFilter::Callback) {
            return Ok(ResponseCollection::default());
        }
        let Some(buffer) = self.buffers.get_mut(tag) else {
            return Err(SessionError::UnknownRequest(tag.to_string()));
        };
        let drained = mem::take(buffer);
        if drained.last().is_some_and(|r| r.is(ResponseType::Final)) {
            self.buffers.remove(tag);
        }
        Ok(ResponseCollection::new(drained))
    }

    /// Read one response and route it.
    ///
    /// A FATAL response or a transport failure drops every tracked request
    /// and closes the connection. `NoData` leaves everything in place.
    pub fn dispatch_next_response(&mut self, timeout: Option<Duration>) -> Result<Response> {
        let response = match self.receive(timeout) {
            Ok(response) => response,
            Err(err) if err.is_no_data() => return Err(err),
            Err(err) => {
                warn!(error = %err, "receive failed, abandoning pending requests");
                self.abandon();
                return Err(err);
            }
        };

        if response.is(ResponseType::Fatal) {
            warn!(message = ?response.argument_str("message"), "connection terminated by device");
            self.abandon();
            return Ok(response);
        }
        if response.is(ResponseType::Final) {
            self.pending = self.pending.saturating_sub(1);
        }

        if let Some(tag) = response.tag().map(str::to_string) {
            self.route(&tag, &response)?;
        }
        Ok(response)
    }

    fn route(&mut self, tag: &str, response: &Response) -> Result<()> {
        if let Some(queue) = self.running.get_mut(tag) {
            queue.push_back(response.clone());
        } else if self.callbacks.contains_key(tag) {
            self.run_callback(tag, response.clone())?;
        } else if let Some(buffer) = self.buffers.get_mut(tag) {
            buffer.push(response.clone());
        } else {
            debug!(tag, response_type = %response.response_type(), "dropping response for untracked tag");
        }
        Ok(())
    }

    /// Hand `response` to the callback of `tag`, followed by whatever the
    /// callback itself caused to be read for `tag`, in wire order.
    fn run_callback(&mut self, tag: &str, response: Response) -> Result<()> {
        let Some(mut callback) = self.callbacks.remove(tag) else {
            return Ok(());
        };
        self.running.insert(tag.to_string(), VecDeque::new());

        let mut next = Some(response);
        let mut finished = false;
        let mut cancel = false;
        while let Some(response) = next {
            finished = response.is(ResponseType::Final);
            cancel = callback(&response, self);
            if finished || cancel {
                break;
            }
            next = self.running.get_mut(tag).and_then(VecDeque::pop_front);
        }

        // Gone when the callback cancelled its own request or the connection failed.
        let Some(rest) = self.running.remove(tag) else {
            return Ok(());
        };
        if finished || rest.iter().any(|r| r.is(ResponseType::Final)) {
            return Ok(());
        }
        self.callbacks.insert(tag.to_string(), callback);
        if cancel {
            match self.cancel_request(Some(tag)) {
                Ok(()) => {}
                Err(err) if err.is_flow_error() => debug!(tag, error = %err, "cancel from callback"),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<Response> {
        let Some(registry) = &self.registry else {
            let mut com = self.com.lock();
            let response = Response::receive(&mut *com, self.streaming, timeout)?;
            return Ok(response);
        };

        loop {
            if let Some(response) = registry.next_response() {
                return Ok(response);
            }
            let mut response = {
                let mut com = self.com.lock();
                Response::receive(&mut *com, self.streaming, timeout)?
            };
            let (owner, tag) = Registry::parse_tag(response.tag());
            response.set_tag(tag);
            if !registry.add(&response, owner.as_deref()) {
                return Ok(response);
            }
            trace!(owner = ?owner, "parked response for another session");
        }
    }

    fn abandon(&mut self) {
        self.buffers.clear();
        self.callbacks.clear();
        self.running.clear();
        self.pending = 0;
        if let Err(err) = self.com.lock().close() {
            debug!(error = %err, "close after failure");
        }
    }

    /// Whether `tag` is still tracked.
    pub fn is_request_active(&self, tag: &str, filter: RequestFilter) -> bool {
        match filter {
            RequestFilter::Callback => self.callbacks.contains_key(tag) || self.running.contains_key(tag),
            RequestFilter::Buffer => self.buffers.contains_key(tag),
            RequestFilter::All => {
                self.is_request_active(tag, RequestFilter::Callback) || self.buffers.contains_key(tag)
            }
        }
    }

    /// Dispatch responses while requests are pending.
    ///
    /// `None` runs until nothing is pending; `Some(d)` stops after `d`.
    /// Returns whether requests are still pending.
    pub fn run_loop(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        while self.pending > 0 {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            match self.dispatch_next_response(remaining) {
                Ok(_) => {}
                Err(err) if err.is_no_data() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(self.pending > 0)
    }

    /// Cancel one request, or every request with `None`.
    ///
    /// Responses still arriving for a cancelled tag are read and discarded.
    pub fn cancel_request(&mut self, tag: Option<&str>) -> Result<()> {
        let prefix = self
            .registry
            .as_ref()
            .map(|registry| registry.ownership_tag().to_string());

        let Some(tag) = tag else {
            match &prefix {
                Some(prefix) => {
                    let targets: Vec<String> = self
                        .callbacks
                        .keys()
                        .chain(self.running.keys())
                        .chain(self.buffers.keys())
                        .map(|tag| format!("{prefix}{tag}"))
                        .collect();
                    for target in targets {
                        self.send_cancel(Some(&target))?;
                    }
                }
                None => {
                    self.send_cancel(None)?;
                }
            }
            self.buffers.clear();
            self.callbacks.clear();
            self.running.clear();
            self.pending = 0;
            return Ok(());
        };

        if !self.is_request_active(tag, RequestFilter::All) {
            return Err(SessionError::CancelFailed(tag.to_string()));
        }
        if self.callbacks.remove(tag).is_some() {
            self.buffers.insert(tag.to_string(), Vec::new());
        } else if let Some(queued) = self.running.remove(tag) {
            self.buffers.insert(tag.to_string(), queued.into());
        }

        let target = match &prefix {
            Some(prefix) => format!("{prefix}{tag}"),
            None => tag.to_string(),
        };
        self.send_cancel(Some(&target))?;
        if self.is_request_active(tag, RequestFilter::All) {
            self.complete_request(Some(tag))?;
        }
        self.buffers.remove(tag);
        debug!(tag, "request cancelled");
        Ok(())
    }

    /// Send `/cancel` and wait for its own FINAL.
    ///
    /// On a shared connection the session holds tagless mode for the whole
    /// round trip. Meanwhile `Registry::add` claims responses carrying
    /// another session's ownership tag as well, so those are read here and
    /// dropped by `route` as untracked.
    fn send_cancel(&mut self, target: Option<&str>) -> Result<ResponseCollection> {
        let mut request = Request::new("/cancel")?;
        if let Some(target) = target {
            request.set_argument("tag", target)?;
        }

        let claimed = match &self.registry {
            Some(registry) if !registry.is_tagless_mode_owner() => registry.set_tagless_mode(true),
            _ => false,
        };
        let result = self.send_sync(request);
        if claimed {
            if let Some(registry) = &self.registry {
                registry.set_tagless_mode(false);
            }
        }
        result
    }

    /// Requests sent whose FINAL has not been read yet.
    pub fn pending_requests_count(&self) -> usize {
        self.pending
    }

    /// Receive argument values as streams from now on.
    pub fn set_streaming_responses(&mut self, streaming: bool) {
        self.streaming = streaming;
    }

    pub fn streaming_responses(&self) -> bool {
        self.streaming
    }

    /// The underlying connection.
    pub fn com(&self) -> &Arc<Mutex<Communicator<T>>> {
        &self.com
    }

    /// The registry routing responses for a shared connection, if any.
    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_ref()
    }

    /// Whether this session shares its connection through a registry.
    pub fn is_shared(&self) -> bool {
        self.registry.is_some()
    }

    /// Close the session and its connection.
    ///
    /// Shared sessions cancel their outstanding requests first. Sends
    /// `/quit` when the connection is still writable. Closing a session
    /// obtained from a [`SessionContext`] also closes the connection for
    /// every other session on it and removes it from the context.
    pub fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        if self.registry.is_some() && self.pending > 0 {
            result = self.cancel_request(None);
        }
        if let Some(registry) = &self.registry {
            registry.close();
        }

        {
            let mut com = self.com.lock();
            if com.is_accepting_data() {
                if let Err(err) = Request::new("/quit").and_then(|mut quit| quit.send(&mut *com)) {
                    debug!(error = %err, "failed to send /quit");
                }
            }
            let closed = com.close();
            result = result.and(closed.map_err(SessionError::from));
        }

        self.buffers.clear();
        self.callbacks.clear();
        self.running.clear();
        self.pending = 0;
        if let Some(link) = self.link.take() {
            link.context.forget(&link.key);
        }
        debug!("session closed");
        result
    }
}

impl<T> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("registry", &self.registry)
            .field("pending", &self.pending)
            .field("buffered", &self.buffers.keys().collect::<Vec<_>>())
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .field("running", &self.running.keys().collect::<Vec<_>>())
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, ErrorKind, Read, Write};

    use rosapi_message::MessageError;
    use rosapi_registry::{RegistryContext, SharedStore};
    use rosapi_transport::{MemoryTransport, Result as TransportResult};
    use rosapi_word::{WordConfig, WordError};

    use super::*;
    use crate::test_support::{wire, written_words};

    fn session(sentences: &[&[&[u8]]]) -> Session<MemoryTransport> {
        Session::new(Communicator::new(MemoryTransport::new(wire(sentences))))
    }

    fn tagged(command: &str, tag: &str) -> Request {
        Request::new(command).unwrap().with_tag(tag)
    }

    /// Memory transport that stalls once after `stall_after` bytes have
    /// been read and breaks once `write_budget` bytes have been written.
    #[derive(Default)]
    struct Flaky {
        inner: MemoryTransport,
        stall_after: Option<usize>,
        write_budget: Option<usize>,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.stall_after == Some(0) {
                self.stall_after = None;
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            let cap = self.stall_after.map_or(buf.len(), |left| left.min(buf.len()));
            let n = self.inner.read(&mut buf[..cap])?;
            if let Some(left) = &mut self.stall_after {
                *left -= n;
            }
            Ok(n)
        }
    }

    impl Write for Flaky {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let cap = match self.write_budget {
                Some(0) => return Err(io::Error::from(ErrorKind::BrokenPipe)),
                Some(left) => left.min(buf.len()),
                None => buf.len(),
            };
            let n = self.inner.write(&buf[..cap])?;
            if let Some(left) = &mut self.write_budget {
                *left -= n;
            }
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl Transport for Flaky {
        fn is_data_awaiting(&mut self, timeout: Option<Duration>) -> TransportResult<bool> {
            self.inner.is_data_awaiting(timeout)
        }

        fn is_accepting_data(&self) -> bool {
            self.inner.is_accepting_data()
        }

        fn close(&mut self) -> TransportResult<()> {
            self.inner.close()
        }

        fn transport_name(&self) -> &'static str {
            "flaky"
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<Response>>>, Callback<MemoryTransport>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = callback(move |response: &Response, _: &mut Session<MemoryTransport>| {
            sink.lock().push(response.clone());
            false
        });
        (seen, cb)
    }

    #[test]
    fn async_request_requires_tag() {
        let mut session = session(&[]);
        let err = session
            .send_async(Request::new("/ip/address/print").unwrap(), None)
            .unwrap_err();
        assert!(matches!(err, SessionError::TagRequired));

        let err = session
            .send_async(tagged("/ip/address/print", ""), None)
            .unwrap_err();
        assert!(matches!(err, SessionError::TagRequired));
        assert_eq!(session.pending_requests_count(), 0);
    }

    #[test]
    fn duplicate_active_tag_is_rejected() {
        let mut session = session(&[]);
        session.send_async(tagged("/ip/address/print", "x"), None).unwrap();

        let err = session
            .send_async(tagged("/ip/route/print", "x"), None)
            .unwrap_err();
        assert!(matches!(err, SessionError::TagNotUnique(tag) if tag == "x"));
        assert_eq!(session.pending_requests_count(), 1);
    }

    #[test]
    fn callback_sees_data_then_final() {
        let mut session = session(&[
            &[b"!re", b"=address=1.2.3.4", b".tag=x"],
            &[b"!done", b".tag=x"],
        ]);
        let (seen, cb) = recorder();
        session.send_async(tagged("/ip/arp/print", "x"), Some(cb)).unwrap();
        assert_eq!(session.pending_requests_count(), 1);

        assert!(!session.run_loop(None).unwrap());

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].is(ResponseType::Data));
        assert_eq!(seen[0].argument_str("address").as_deref(), Some("1.2.3.4"));
        assert!(seen[1].is(ResponseType::Final));
        assert_eq!(session.pending_requests_count(), 0);
        assert!(!session.is_request_active("x", RequestFilter::All));
    }

    #[test]
    fn callback_tag_yields_no_buffered_responses() {
        let mut session = session(&[&[b"!re", b"=address=1.2.3.4", b".tag=x"]]);
        let (seen, cb) = recorder();
        session.send_async(tagged("/ip/arp/print", "x"), Some(cb)).unwrap();

        session.dispatch_next_response(None).unwrap();

        assert_eq!(seen.lock().len(), 1);
        assert!(session.extract_new_responses(Some("x")).unwrap().is_empty());
        assert!(session.is_request_active("x", RequestFilter::Callback));
        assert!(!session.is_request_active("x", RequestFilter::Buffer));
    }

    #[test]
    fn sync_untagged_request_collects_until_final() {
        let mut session = session(&[&[b"!re", b"=name=TestRouter"], &[b"!done"]]);
        let responses = session
            .send_sync(Request::new("/system/identity/print").unwrap())
            .unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].argument_str("name").as_deref(), Some("TestRouter"));
        assert!(responses[1].is(ResponseType::Final));
        assert_eq!(session.pending_requests_count(), 0);
    }

    #[test]
    fn sync_tagged_request_leaves_other_tags_buffered() {
        let mut session = session(&[
            &[b"!re", b"=n=a1", b".tag=a"],
            &[b"!re", b"=n=b1", b".tag=b"],
            &[b"!done", b".tag=b"],
            &[b"!done", b".tag=a"],
        ]);
        session.send_async(tagged("/interface/listen", "a"), None).unwrap();
        let b = session.send_sync(tagged("/system/resource/print", "b")).unwrap();

        assert_eq!(b.len(), 2);
        assert!(b.iter().all(|r| r.tag() == Some("b")));
        assert!(!session.is_request_active("b", RequestFilter::All));

        let a = session.extract_new_responses(Some("a")).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].argument_str("n").as_deref(), Some("a1"));
        assert!(session.is_request_active("a", RequestFilter::Buffer));

        let rest = session.complete_request(Some("a")).unwrap();
        assert_eq!(rest.len(), 1);
        assert!(rest[0].is(ResponseType::Final));
        assert!(!session.is_request_active("a", RequestFilter::All));
        assert_eq!(session.pending_requests_count(), 0);
    }

    #[test]
    fn extract_all_merges_buffered_tags() {
        let mut session = session(&[
            &[b"!re", b".tag=a"],
            &[b"!re", b".tag=b"],
            &[b"!done", b".tag=b"],
        ]);
        session.send_async(tagged("/a", "a"), None).unwrap();
        session.send_async(tagged("/b", "b"), None).unwrap();
        for _ in 0..3 {
            session.dispatch_next_response(None).unwrap();
        }

        let all = session.extract_new_responses(None).unwrap();
        assert_eq!(all.len(), 3);
        assert!(session.is_request_active("a", RequestFilter::Buffer));
        assert!(!session.is_request_active("b", RequestFilter::Buffer));
    }

    #[test]
    fn extract_unknown_tag_fails() {
        let mut session = session(&[]);
        let err = session.extract_new_responses(Some("nope")).unwrap_err();
        assert!(matches!(err, SessionError::UnknownRequest(tag) if tag == "nope"));
    }

    #[test]
    fn fatal_abandons_everything() {
        let mut session = session(&[&[b"!fatal", b"=message=session terminated"]]);
        session.send_async(tagged("/a", "a"), None).unwrap();
        let (_, cb) = recorder();
        session.send_async(tagged("/b", "b"), Some(cb)).unwrap();

        let response = session.dispatch_next_response(None).unwrap();

        assert!(response.is(ResponseType::Fatal));
        assert_eq!(session.pending_requests_count(), 0);
        assert!(!session.is_request_active("a", RequestFilter::All));
        assert!(!session.is_request_active("b", RequestFilter::All));
        assert!(session.com().lock().get_ref().is_closed());
    }

    #[test]
    fn fatal_ends_tagged_wait() {
        let mut session = session(&[&[b"!re", b".tag=a"], &[b"!fatal", b"=message=bye"]]);
        let responses = session.send_sync(tagged("/a", "a")).unwrap();
        assert_eq!(responses.len(), 2);
        assert!(responses.last().unwrap().is(ResponseType::Fatal));
    }

    #[test]
    fn truncated_word_abandons_and_closes() {
        let mut incoming = wire(&[&[b"!re"]]);
        incoming.pop();
        incoming.extend_from_slice(&[0x05, b'=', b'a']);
        let mut session = Session::new(Communicator::new(MemoryTransport::new(incoming)));
        session.send_async(tagged("/a", "a"), None).unwrap();

        let err = session.dispatch_next_response(None).unwrap_err();
        assert!(!err.is_no_data());
        assert_eq!(session.pending_requests_count(), 0);
        assert!(session.com().lock().get_ref().is_closed());
    }

    #[test]
    fn run_loop_stops_quietly_without_data() {
        let mut session = session(&[]);
        session.send_async(tagged("/a", "a"), None).unwrap();
        assert!(session.run_loop(Some(Duration::from_millis(10))).unwrap());
        assert!(session.is_request_active("a", RequestFilter::All));
    }

    #[test]
    fn callback_returning_true_cancels_the_request() {
        let mut session = session(&[
            &[b"!re", b"=n=1", b".tag=x"],
            &[b"!trap", b"=category=2", b"=message=interrupted", b".tag=x"],
            &[b"!done"],
            &[b"!done", b".tag=x"],
        ]);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let cb = callback(move |_: &Response, _: &mut Session<MemoryTransport>| {
            *counter.lock() += 1;
            true
        });
        session.send_async(tagged("/interface/listen", "x"), Some(cb)).unwrap();

        assert!(!session.run_loop(None).unwrap());

        assert_eq!(*calls.lock(), 1);
        assert!(!session.is_request_active("x", RequestFilter::All));
        assert_eq!(session.pending_requests_count(), 0);

        let words = written_words(&session.com().lock());
        let cancel = words.iter().position(|w| w == b"/cancel").unwrap();
        assert_eq!(words[cancel + 1], b"=tag=x".to_vec());
    }

    #[test]
    fn cancel_inactive_tag_fails() {
        let mut session = session(&[]);
        let err = session.cancel_request(Some("x")).unwrap_err();
        assert!(matches!(err, SessionError::CancelFailed(tag) if tag == "x"));
    }

    #[test]
    fn cancel_all_drops_tracking() {
        let mut session = session(&[&[b"!done"]]);
        session.send_async(tagged("/a", "a"), None).unwrap();
        session.send_async(tagged("/b", "b"), None).unwrap();

        session.cancel_request(None).unwrap();

        assert_eq!(session.pending_requests_count(), 0);
        assert!(!session.is_request_active("a", RequestFilter::All));
        let words = written_words(&session.com().lock());
        assert!(words.contains(&b"/cancel".to_vec()));
        assert!(!words.iter().any(|w| w.starts_with(b"=tag=")));
    }

    #[test]
    fn close_sends_quit_and_closes() {
        let mut session = session(&[]);
        session.close().unwrap();

        let com = session.com().lock();
        assert!(com.get_ref().is_closed());
        assert_eq!(written_words(&com), vec![b"/quit".to_vec(), Vec::new()]);
    }

    #[test]
    fn shared_sessions_route_by_ownership_tag() {
        let store = SharedStore::new();
        let context = Arc::new(RegistryContext::new());
        let key = "10.0.0.1:8728/admin";
        let com = Arc::new(Mutex::new(Communicator::new(MemoryTransport::new(wire(&[
            &[b"!re", b"=n=b", b".tag=0_1__t"],
            &[b"!done", b".tag=0_1__t"],
            &[b"!re", b"=n=a", b".tag=0_0__t"],
            &[b"!done", b".tag=0_0__t"],
        ])))));

        let mut a = Session::from_shared(
            Arc::clone(&com),
            Some(Registry::new(Arc::clone(&context), &store, key)),
        );
        let mut b = Session::from_shared(
            Arc::clone(&com),
            Some(Registry::new(Arc::clone(&context), &store, key)),
        );
        a.send_async(tagged("/a", "t"), None).unwrap();
        b.send_async(tagged("/b", "t"), None).unwrap();

        let from_a = a.complete_request(Some("t")).unwrap();
        assert_eq!(from_a.len(), 2);
        assert_eq!(from_a[0].argument_str("n").as_deref(), Some("a"));
        assert_eq!(from_a[0].tag(), Some("t"));
        assert_eq!(b.registry().unwrap().pending_responses(), 2);

        let from_b = b.complete_request(Some("t")).unwrap();
        assert_eq!(from_b.len(), 2);
        assert_eq!(from_b[0].argument_str("n").as_deref(), Some("b"));

        let words = written_words(&com.lock());
        assert!(words.contains(&b".tag=0_0__t".to_vec()));
        assert!(words.contains(&b".tag=0_1__t".to_vec()));
    }

    #[test]
    fn shared_untagged_request_carries_ownership_tag() {
        let store = SharedStore::new();
        let context = Arc::new(RegistryContext::new());
        let com = Arc::new(Mutex::new(Communicator::new(MemoryTransport::new(wire(&[
            &[b"!re", b"=name=TestRouter", b".tag=0_0__"],
            &[b"!done", b".tag=0_0__"],
        ])))));
        let registry = Registry::new(context, &store, "10.0.0.1:8728/admin");
        let mut session = Session::from_shared(Arc::clone(&com), Some(registry));

        let responses = session
            .send_sync(Request::new("/system/identity/print").unwrap())
            .unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].tag(), None);
        assert!(written_words(&com.lock()).contains(&b".tag=0_0__".to_vec()));
    }

    #[test]
    fn stall_mid_sentence_abandons_instead_of_desyncing() {
        let transport = Flaky {
            inner: MemoryTransport::new(wire(&[&[b"!re", b"=name=TestRouter", b".tag=a"]])),
            stall_after: Some(4),
            ..Flaky::default()
        };
        let mut session = Session::new(Communicator::new(transport));
        session.send_async(tagged("/system/identity/print", "a"), None).unwrap();

        let err = session.dispatch_next_response(None).unwrap_err();

        assert!(!err.is_no_data());
        assert!(matches!(
            err,
            SessionError::Message(MessageError::Word(WordError::TimedOut { .. }))
        ));
        assert!(!session.is_request_active("a", RequestFilter::All));
        assert_eq!(session.pending_requests_count(), 0);
        assert!(session.com().lock().get_ref().inner.is_closed());
    }

    #[test]
    fn broken_write_abandons_tracking_and_closes() {
        let transport = Flaky {
            write_budget: Some(12),
            ..Flaky::default()
        };
        let mut session = Session::new(Communicator::new(transport));
        // "/a", ".tag=a" and the terminator take 11 bytes.
        session.send_async(tagged("/a", "a"), None).unwrap();

        let err = session.send_async(tagged("/b", "b"), None).unwrap_err();

        assert!(matches!(err, SessionError::Message(MessageError::Word(WordError::Io(_)))));
        assert_eq!(session.pending_requests_count(), 0);
        assert!(!session.is_request_active("a", RequestFilter::All));
        assert!(!session.is_request_active("b", RequestFilter::All));
        assert!(session.com().lock().get_ref().inner.is_closed());
    }

    #[test]
    fn oversized_request_is_rejected_without_closing() {
        let config = WordConfig {
            max_word_length: 16,
            ..WordConfig::default()
        };
        let mut session = Session::new(Communicator::with_config(MemoryTransport::default(), config));
        session.send_async(tagged("/a", "a"), None).unwrap();

        let request = tagged("/system/note/set", "b")
            .with_argument("note", "x".repeat(32))
            .unwrap();
        let err = session.send_async(request, None).unwrap_err();

        assert!(matches!(
            err,
            SessionError::Message(MessageError::Word(WordError::UnsupportedLength { .. }))
        ));
        assert_eq!(session.pending_requests_count(), 1);
        assert!(session.is_request_active("a", RequestFilter::Buffer));
        assert!(!session.com().lock().get_ref().is_closed());
    }

    #[test]
    fn callback_can_chain_requests_without_losing_responses() {
        let mut session = session(&[
            &[b"!re", b"=n=1", b".tag=x"],
            &[b"!re", b"=n=2", b".tag=x"],
            &[b"!done"],
            &[b"!done", b".tag=x"],
        ]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb = callback(move |response: &Response, session: &mut Session<MemoryTransport>| {
            let first = sink.lock().is_empty();
            sink.lock().push((
                response.response_type(),
                response.argument_str("n").map(|n| n.into_owned()),
            ));
            if first {
                assert!(session.is_request_active("x", RequestFilter::Callback));
                let identity = session
                    .send_sync(Request::new("/system/identity/print").unwrap())
                    .unwrap();
                assert!(identity.last().unwrap().is(ResponseType::Final));
            }
            false
        });
        session.send_async(tagged("/interface/listen", "x"), Some(cb)).unwrap();

        assert!(!session.run_loop(None).unwrap());

        assert_eq!(
            *seen.lock(),
            vec![
                (ResponseType::Data, Some("1".to_string())),
                (ResponseType::Data, Some("2".to_string())),
                (ResponseType::Final, None),
            ]
        );
        assert!(!session.is_request_active("x", RequestFilter::All));
    }

    #[test]
    fn callback_cancelling_its_own_request_keeps_queued_final() {
        let mut session = session(&[
            &[b"!re", b"=n=1", b".tag=x"],
            &[b"!trap", b"=category=2", b"=message=interrupted", b".tag=x"],
            &[b"!done"],
            &[b"!done", b".tag=x"],
        ]);
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let cb = callback(move |_: &Response, session: &mut Session<MemoryTransport>| {
            *counter.lock() += 1;
            session.cancel_request(Some("x")).unwrap();
            false
        });
        session.send_async(tagged("/interface/listen", "x"), Some(cb)).unwrap();

        assert!(!session.run_loop(None).unwrap());

        assert_eq!(*calls.lock(), 1);
        assert!(!session.is_request_active("x", RequestFilter::All));
        assert_eq!(session.pending_requests_count(), 0);
    }
}
