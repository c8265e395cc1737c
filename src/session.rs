//! Caller-owned session storage.
//!
//! Services that keep a configured pipeline per client session inject a
//! [`SessionStore`]; nothing in the crate holds sessions globally.

use dashmap::DashMap;
use rand::Rng;

/// Key-value store for per-session values.
pub trait SessionStore<V>: Send + Sync {
    fn get(&self, id: &str) -> Option<V>;

    /// Insert or replace, returning the previous value.
    fn put(&self, id: &str, value: V) -> Option<V>;

    fn remove(&self, id: &str) -> Option<V>;

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

/// In-memory [`SessionStore`] over a concurrent map.
///
/// Values are cloned out; store an `Arc` for shared pipelines.
#[derive(Debug)]
pub struct MemorySessionStore<V> {
    sessions: DashMap<String, V>,
}

impl<V> MemorySessionStore<V> {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// All session ids, in no particular order.
    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|r| r.key().clone()).collect()
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }
}

impl<V> Default for MemorySessionStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync> SessionStore<V> for MemorySessionStore<V> {
    fn get(&self, id: &str) -> Option<V> {
        self.sessions.get(id).map(|r| r.value().clone())
    }

    fn put(&self, id: &str, value: V) -> Option<V> {
        self.sessions.insert(id.to_string(), value)
    }

    fn remove(&self, id: &str) -> Option<V> {
        self.sessions.remove(id).map(|(_, v)| v)
    }

    fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }
}

/// A random 128-bit session id as 32 lowercase hex digits.
pub fn new_session_id() -> String {
    let bits: u128 = rand::thread_rng().r#gen();
    format!("{bits:032x}")
}
