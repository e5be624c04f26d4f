//! Schema caches owned by a registry client
//!
//! Both caches only grow. An ID, once bound to a schema body, is never
//! rebound. Subject entries can be refreshed by a re-registration.
//!
//! [`Inflight`] coalesces concurrent misses: the first caller for a key
//! starts the resolution and every later caller awaits the same shared
//! future, so N concurrent misses cost one registry round-trip.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{RegistryError, Result};
use crate::fingerprint::Fingerprint;
use crate::schema::{SchemaBody, SchemaId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct SchemaCacheState {
    by_id: HashMap<SchemaId, Arc<SchemaBody>>,
    by_fingerprint: HashMap<Fingerprint, SchemaId>,
}

/// `id -> schema body`, write-once per ID
#[derive(Debug, Default)]
pub struct SchemaCache {
    state: Mutex<SchemaCacheState>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `id` to `body` unless it is already bound
    ///
    /// Returns the body the ID is bound to after the call, which is the
    /// earlier one if the ID was already cached.
    pub fn insert(&self, id: SchemaId, body: Arc<SchemaBody>) -> Arc<SchemaBody> {
        let mut state = lock(&self.state);
        if let Some(existing) = state.by_id.get(&id) {
            return Arc::clone(existing);
        }
        state
            .by_fingerprint
            .entry(body.fingerprint().clone())
            .or_insert(id);
        state.by_id.insert(id, Arc::clone(&body));
        body
    }

    pub fn get(&self, id: SchemaId) -> Option<Arc<SchemaBody>> {
        lock(&self.state).by_id.get(&id).cloned()
    }

    /// ID of a cached schema with this fingerprint
    pub fn id_of(&self, fingerprint: &Fingerprint) -> Option<SchemaId> {
        lock(&self.state).by_fingerprint.get(fingerprint).copied()
    }

    pub fn contains(&self, id: SchemaId) -> bool {
        lock(&self.state).by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Key of a registration: the subject and the body's fingerprint
pub type SubjectKey = (String, Fingerprint);

/// `(subject, schema) -> id`
#[derive(Debug, Default)]
pub struct SubjectCache {
    ids: Mutex<HashMap<SubjectKey, SchemaId>>,
}

impl SubjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: SubjectKey, id: SchemaId) {
        lock(&self.ids).insert(key, id);
    }

    pub fn get(&self, key: &SubjectKey) -> Option<SchemaId> {
        lock(&self.ids).get(key).copied()
    }

    pub fn len(&self) -> usize {
        lock(&self.ids).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A resolution every waiter for a key shares
pub type SharedResolution<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Pending resolutions keyed by their cache-miss key
pub struct Inflight<K, T: Clone> {
    pending: Mutex<HashMap<K, SharedResolution<T>>>,
}

impl<K, T: Clone> Default for Inflight<K, T> {
    fn default() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> Inflight<K, T>
where
    K: Eq + Hash + Clone,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the pending resolution for `key`, or start one
    ///
    /// `cached` runs under the same lock as the pending map. A resolution
    /// writes its cache entry before it is removed from the map, so a key
    /// is always either pending or answered by `cached`.
    ///
    /// A started resolution runs as its own task, so it completes even when
    /// every waiter goes away. A failure nobody collected is not handed to
    /// later callers; they start over.
    pub fn join_or_start<P, S>(&self, key: &K, cached: P, start: S) -> SharedResolution<T>
    where
        P: FnOnce() -> Option<T>,
        S: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let mut pending = lock(&self.pending);
        if let Some(existing) = pending.get(key) {
            if !matches!(existing.peek(), Some(Err(_))) {
                return existing.clone();
            }
        }
        if let Some(hit) = cached() {
            pending.remove(key);
            return futures::future::ready(Ok(hit)).boxed().shared();
        }

        let task = tokio::spawn(start());
        let resolution = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(RegistryError::Aborted(e.to_string())),
            }
        }
        .boxed()
        .shared();
        pending.insert(key.clone(), resolution.clone());
        resolution
    }

    /// Forget a completed resolution
    ///
    /// Only removes the entry if it is still `resolution`, so a failed
    /// attempt never evicts a newer one.
    pub fn finish(&self, key: &K, resolution: &SharedResolution<T>) {
        let mut pending = lock(&self.pending);
        if pending
            .get(key)
            .is_some_and(|current| current.ptr_eq(resolution))
        {
            pending.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
