//! Client registry: display name to outbound sink.
//!
//! One [`parking_lot::Mutex`] guards both the membership map and the closed
//! flag, so a client can never be added after shutdown has emptied the map.
//! Every critical section is plain map work; iteration copies a snapshot and
//! runs the caller's closure with the lock released.

use std::collections::HashMap;

use crate::sink::ClientSink;

/// Errors returned by [`ClientRegistry::add`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Another connected client already holds this name.
    #[error("nickname {0:?} is already taken")]
    NameConflict(String),
    /// The registry was closed by a server shutdown.
    #[error("registry is closed")]
    Closed,
}

struct RegistryInner {
    clients: HashMap<String, ClientSink>,
    closed: bool,
}

/// Thread-safe membership of currently connected, named clients.
pub struct ClientRegistry {
    inner: parking_lot::Mutex<RegistryInner>,
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistry {
    /// Creates an empty, open registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(RegistryInner {
                clients: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Registers `name`.
    ///
    /// Existing entries are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NameConflict`] if the name is taken, or
    /// [`RegistryError::Closed`] after [`close`](Self::close).
    pub fn add(&self, name: &str, sink: ClientSink) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RegistryError::Closed);
        }
        if inner.clients.contains_key(name) {
            return Err(RegistryError::NameConflict(name.to_string()));
        }
        inner.clients.insert(name.to_string(), sink);
        drop(inner);
        Ok(())
    }

    /// Removes `name`, returning whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        self.inner.lock().clients.remove(name).is_some()
    }

    /// Point-in-time membership check.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.lock().clients.contains_key(name)
    }

    /// Copies every member except `excluded` while holding the lock.
    #[must_use]
    pub fn snapshot_except(&self, excluded: &str) -> Vec<(String, ClientSink)> {
        let inner = self.inner.lock();
        inner
            .clients
            .iter()
            .filter(|(name, _)| name.as_str() != excluded)
            .map(|(name, sink)| (name.clone(), sink.clone()))
            .collect()
    }

    /// Calls `f` for every member except `excluded`.
    ///
    /// `f` runs over a snapshot with the lock released, so it may block or
    /// call back into the registry. Members added or removed meanwhile may or
    /// may not be visited; none is visited twice.
    pub fn for_each_except<F>(&self, excluded: &str, mut f: F)
    where
        F: FnMut(&str, &ClientSink),
    {
        for (name, sink) in self.snapshot_except(excluded) {
            f(&name, &sink);
        }
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().clients.len()
    }

    /// Whether no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().clients.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Closes the registry: later [`add`](Self::add) calls fail and every
    /// sink is dropped. Returns the names that were registered.
    ///
    /// Calling it again returns an empty list.
    pub fn close(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let drained: Vec<String> = inner.clients.drain().map(|(name, _)| name).collect();
        drop(inner);
        drained
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
