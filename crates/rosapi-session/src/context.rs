use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rosapi_registry::{Registry, RegistryContext, SharedStore};
use rosapi_transport::{TcpTransport, Transport};
use rosapi_word::Communicator;
use tracing::debug;

use crate::error::Result;
use crate::session::Session;

type SharedConnection<T> = Arc<Mutex<Communicator<T>>>;

/// Persistent connections and their registry state.
///
/// Sessions obtained from the same context with the same connection key
/// share one logged-in connection. Create one context per group of
/// sessions that may share connections, typically one per process.
pub struct SessionContext<T = TcpTransport> {
    registry_context: Arc<RegistryContext>,
    store: SharedStore,
    connections: Mutex<HashMap<String, SharedConnection<T>>>,
}

impl<T: Transport> SessionContext<T> {
    pub fn new() -> Self {
        Self {
            registry_context: Arc::new(RegistryContext::new()),
            store: SharedStore::new(),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Session on the connection stored under `key`.
    ///
    /// A live connection is reused as is. Otherwise `open` is called to
    /// establish and log in a new one, which replaces any closed entry.
    pub fn session_with<F>(self: &Arc<Self>, key: &str, open: F) -> Result<Session<T>>
    where
        F: FnOnce() -> Result<Communicator<T>>,
    {
        let com = {
            let mut connections = self.connections.lock();
            let existing = match connections.get(key) {
                Some(com) => {
                    let alive = com.lock().is_accepting_data();
                    alive.then(|| Arc::clone(com))
                }
                None => None,
            };
            match existing {
                Some(com) => {
                    debug!(key, "reusing persistent connection");
                    com
                }
                None => {
                    let com = Arc::new(Mutex::new(open()?));
                    connections.insert(key.to_string(), Arc::clone(&com));
                    debug!(key, "opened persistent connection");
                    com
                }
            }
        };

        let registry = Registry::new(Arc::clone(&self.registry_context), &self.store, key);
        Ok(Session::from_shared(com, Some(registry)).with_link(Arc::clone(self), key.to_string()))
    }

    /// Whether a live connection is stored under `key`.
    pub fn is_connected(&self, key: &str) -> bool {
        match self.connections.lock().get(key) {
            Some(com) => {
                let alive = com.lock().is_accepting_data();
                alive
            }
            None => false,
        }
    }

    /// Number of stored connections, live or not.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub(crate) fn forget(&self, key: &str) {
        self.connections.lock().remove(key);
    }
}

impl<T: Transport> Default for SessionContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SessionContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.connections.lock().keys().cloned().collect();
        f.debug_struct("SessionContext")
            .field("connections", &keys)
            .finish_non_exhaustive()
    }
}
