use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rosapi_message::{Response, ResponseType};
use tracing::{debug, warn};

use crate::store::{Segment, SharedStore};

/// Separator ending an ownership tag inside a response tag.
pub const OWNERSHIP_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy)]
struct KeyCounters {
    request_id: u64,
    next_instance_id: u64,
}

/// Per-process counters for registries, keyed by connection key.
///
/// The request id is taken from the shared segment the first time a key is
/// seen and reused for every later registry on that key; instance ids
/// increase monotonically until [`Registry::close`] resets the key.
#[derive(Debug, Default)]
pub struct RegistryContext {
    counters: Mutex<HashMap<String, KeyCounters>>,
}

impl RegistryContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&self, key: &str, segment: &Segment) -> (u64, u64) {
        let mut counters = self.counters.lock();
        let entry = counters.entry(key.to_string()).or_insert_with(|| KeyCounters {
            request_id: segment.next_request_id(),
            next_instance_id: 0,
        });
        let instance_id = entry.next_instance_id;
        entry.next_instance_id += 1;
        (entry.request_id, instance_id)
    }

    /// Forget the counters for `key`.
    pub fn reset(&self, key: &str) {
        self.counters.lock().remove(key);
    }
}

/// Routes responses read from a shared connection to the instance that
/// sent the matching request.
///
/// Every outgoing tag is prefixed with this instance's ownership tag
/// (`"{request_id}_{instance_id}__"`), so whichever instance reads a
/// response can tell whose it is and park it in the owner's buffer.
pub struct Registry {
    key: String,
    context: Arc<RegistryContext>,
    segment: Arc<Segment>,
    ownership_tag: String,
}

impl Registry {
    /// Bind to the segment for `key` and allocate this instance's buffer.
    pub fn new(context: Arc<RegistryContext>, store: &SharedStore, key: &str) -> Self {
        let segment = store.segment(key);
        let (request_id, instance_id) = context.allocate(key, &segment);
        let ownership_tag = format!("{request_id}_{instance_id}{OWNERSHIP_SEPARATOR}");
        segment.create_buffer(&ownership_tag);

        debug!(key, ownership_tag = %ownership_tag, "registry created");
        Self {
            key: key.to_string(),
            context,
            segment,
            ownership_tag,
        }
    }

    /// Connection key this registry is bound to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Prefix identifying this instance's requests.
    pub fn ownership_tag(&self) -> &str {
        &self.ownership_tag
    }

    /// Split a received tag into its ownership part and the caller's tag.
    ///
    /// The ownership part keeps its trailing `__`. An empty caller tag
    /// becomes `None`, as does the ownership part of a tag without `__`.
    pub fn parse_tag(tag: Option<&str>) -> (Option<String>, Option<String>) {
        let Some(tag) = tag else {
            return (None, None);
        };
        match tag.split_once(OWNERSHIP_SEPARATOR) {
            Some((owner, rest)) => (
                Some(format!("{owner}{OWNERSHIP_SEPARATOR}")),
                (!rest.is_empty()).then(|| rest.to_string()),
            ),
            None => (None, Some(tag.to_string())),
        }
    }

    /// Claim (`true`) or release (`false`) ownership of untagged responses.
    ///
    /// Claiming succeeds only while nobody else holds it; releasing only
    /// while this instance holds it. Returns whether the change happened
    /// (or, when claiming, whether this instance already held it).
    pub fn set_tagless_mode(&self, enabled: bool) -> bool {
        if enabled {
            self.segment.claim_tagless(&self.ownership_tag)
        } else {
            self.segment.release_tagless(&self.ownership_tag)
        }
    }

    /// Whether this instance owns untagged responses.
    pub fn is_tagless_mode_owner(&self) -> bool {
        self.segment.tagless_owner().as_deref() == Some(self.ownership_tag.as_str())
    }

    /// Park `response` for its owner.
    ///
    /// Returns `false` when the response belongs to this instance and should
    /// be handled directly. Untagged responses go to the tagless owner, or
    /// to every instance when nobody holds tagless mode. Untagged FATAL
    /// responses always go to every instance.
    pub fn add(&self, response: &Response, ownership_tag: Option<&str>) -> bool {
        let fatal = response.is(ResponseType::Fatal);
        if ownership_tag == Some(self.ownership_tag.as_str())
            || (!fatal && self.is_tagless_mode_owner())
        {
            return false;
        }

        let owner = match ownership_tag {
            Some(owner) => owner.to_string(),
            None => match self.segment.tagless_owner() {
                Some(owner) if !fatal => owner,
                _ => {
                    self.segment.broadcast(response);
                    return true;
                }
            },
        };

        if !self.segment.push(&owner, response.clone()) {
            warn!(key = %self.key, owner = %owner, "dropping response for departed owner");
        }
        true
    }

    /// Next response parked for this instance, oldest first.
    pub fn next_response(&self) -> Option<Response> {
        self.segment.pop(&self.ownership_tag)
    }

    /// Number of responses parked for this instance.
    pub fn pending_responses(&self) -> usize {
        self.segment.pending_for(&self.ownership_tag)
    }

    /// Reset the counters for this key and clear the whole segment.
    ///
    /// Affects every instance sharing the key, not just this one.
    pub fn close(&self) {
        self.context.reset(&self.key);
        self.segment.clear();
        debug!(key = %self.key, "registry closed");
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.segment.release_tagless(&self.ownership_tag);
        self.segment.remove_buffer(&self.ownership_tag);
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("key", &self.key)
            .field("ownership_tag", &self.ownership_tag)
            .finish_non_exhaustive()
    }
}
