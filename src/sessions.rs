use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::review::ReviewSession;

pub const DEFAULT_SESSION_CAPACITY: usize = 256;

/// Bounded in-memory store of review sessions (LRU). The least recently
/// touched session is evicted once capacity is reached.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Mutex<LruCache<Uuid, ReviewSession>>>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
        }
    }

    pub async fn create(&self) -> ReviewSession {
        let session = ReviewSession::new();
        let mut cache = self.inner.lock().await;
        if let Some((evicted, _)) = cache.push(session.id, session.clone())
            && evicted != session.id
        {
            debug!("Session {} evicted (capacity {})", evicted, cache.cap());
        }
        session
    }

    /// Snapshot of a session.
    pub async fn get(&self, id: Uuid) -> Result<ReviewSession> {
        let mut cache = self.inner.lock().await;
        cache.get(&id).cloned().ok_or_else(|| missing(id))
    }

    /// Mutate a session in place. The lock is held only for the closure, so
    /// `f` must not await.
    pub async fn update<T, F>(&self, id: Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut ReviewSession) -> Result<T>,
    {
        let mut cache = self.inner.lock().await;
        let session = cache.get_mut(&id).ok_or_else(|| missing(id))?;
        f(session)
    }

    pub async fn remove(&self, id: Uuid) -> Result<ReviewSession> {
        let mut cache = self.inner.lock().await;
        cache.pop(&id).ok_or_else(|| missing(id))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}

fn missing(id: Uuid) -> GatewayError {
    GatewayError::not_found(format!("session '{}'", id))
}
