use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rosapi_message::Response;

type ResponseBuffer = Arc<Mutex<VecDeque<Response>>>;

/// Storage shared by every registry bound to the same connection key.
///
/// Each piece of state has its own lock, so an instance draining its
/// buffer never blocks another instance claiming tagless mode.
#[derive(Debug, Default)]
pub struct Segment {
    request_id: Mutex<Option<u64>>,
    tagless_owner: Mutex<Option<String>>,
    buffers: RwLock<HashMap<String, ResponseBuffer>>,
}

impl Segment {
    /// Start a new request generation: 0 when unset, otherwise incremented.
    pub(crate) fn next_request_id(&self) -> u64 {
        let mut request_id = self.request_id.lock();
        let next = match *request_id {
            Some(current) => current + 1,
            None => 0,
        };
        *request_id = Some(next);
        next
    }

    pub(crate) fn tagless_owner(&self) -> Option<String> {
        self.tagless_owner.lock().clone()
    }

    /// Claim the tagless slot for `owner` if nobody holds it.
    pub(crate) fn claim_tagless(&self, owner: &str) -> bool {
        let mut slot = self.tagless_owner.lock();
        match slot.as_deref() {
            None => {
                *slot = Some(owner.to_string());
                true
            }
            Some(current) => current == owner,
        }
    }

    /// Release the tagless slot if `owner` holds it.
    pub(crate) fn release_tagless(&self, owner: &str) -> bool {
        let mut slot = self.tagless_owner.lock();
        if slot.as_deref() == Some(owner) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn create_buffer(&self, owner: &str) {
        self.buffers
            .write()
            .entry(owner.to_string())
            .or_default();
    }

    pub(crate) fn remove_buffer(&self, owner: &str) {
        self.buffers.write().remove(owner);
    }

    fn buffer(&self, owner: &str) -> Option<ResponseBuffer> {
        self.buffers.read().get(owner).cloned()
    }

    /// Append to one owner's buffer. Returns false if the owner is gone.
    pub(crate) fn push(&self, owner: &str, response: Response) -> bool {
        match self.buffer(owner) {
            Some(buffer) => {
                buffer.lock().push_back(response);
                true
            }
            None => false,
        }
    }

    /// Append a copy of `response` to every buffer.
    pub(crate) fn broadcast(&self, response: &Response) {
        let buffers: Vec<ResponseBuffer> = self.buffers.read().values().cloned().collect();
        for buffer in buffers {
            buffer.lock().push_back(response.clone());
        }
    }

    pub(crate) fn pop(&self, owner: &str) -> Option<Response> {
        self.buffer(owner)?.lock().pop_front()
    }

    /// Number of responses waiting for `owner`.
    pub fn pending_for(&self, owner: &str) -> usize {
        match self.buffer(owner) {
            Some(buffer) => {
                let len = buffer.lock().len();
                len
            }
            None => 0,
        }
    }

    /// Number of registered instance buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.read().len()
    }

    /// Drop every piece of state.
    pub(crate) fn clear(&self) {
        *self.request_id.lock() = None;
        *self.tagless_owner.lock() = None;
        self.buffers.write().clear();
    }
}

/// Named segments, one per connection key.
///
/// Create one store per group of sessions that may share connections and
/// hand it to every [`crate::Registry`] in that group.
#[derive(Debug, Default)]
pub struct SharedStore {
    segments: Mutex<HashMap<String, Arc<Segment>>>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Segment for `key`, created on first use.
    pub fn segment(&self, key: &str) -> Arc<Segment> {
        Arc::clone(self.segments.lock().entry(key.to_string()).or_default())
    }

    /// Whether a segment exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.segments.lock().contains_key(key)
    }
}
