//! Checkpointed conversation threads.
//!
//! A turn locks its thread for its whole duration, loads the history, and
//! saves it back when the turn ends. Turns on different threads never wait on
//! each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use toolwright_core::message::{ConversationThread, ThreadId};
use tracing::debug;

/// How many threads an in-memory store keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Unbounded,
    /// Keep at most `n` threads; the least recently updated goes first.
    Capacity(usize),
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::Capacity(1_000)
    }
}

impl EvictionPolicy {
    /// `0` means unbounded, matching `[session] max_threads`.
    pub fn from_max_threads(max_threads: usize) -> Self {
        if max_threads == 0 {
            Self::Unbounded
        } else {
            Self::Capacity(max_threads)
        }
    }
}

/// Held for the duration of one turn on a thread.
///
/// Dropping it releases the thread, then runs the store's release hook. A
/// cancelled turn drops it at whatever await it was parked on.
pub struct ThreadLock {
    guard: Option<OwnedMutexGuard<()>>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl ThreadLock {
    pub fn new(guard: OwnedMutexGuard<()>) -> Self {
        Self {
            guard: Some(guard),
            on_release: None,
        }
    }

    /// Run `hook` after the thread has been unlocked.
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for ThreadLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadLock")
            .field("held", &self.guard.is_some())
            .finish()
    }
}

impl Drop for ThreadLock {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

type ThreadMap = Arc<Mutex<HashMap<ThreadId, ConversationThread>>>;
type LockMap = Arc<Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>>;

/// Drop the lock entry of `id` unless a turn still holds or awaits it.
fn prune_lock(locks: &LockMap, id: &ThreadId) {
    let mut locks = locks.lock().unwrap_or_else(|e| e.into_inner());
    if locks.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
        locks.remove(id);
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Serialize turns on `thread_id`.
    async fn lock(&self, thread_id: &ThreadId) -> ThreadLock;

    async fn load(&self, thread_id: &ThreadId) -> Option<ConversationThread>;

    /// Checkpoint the thread, replacing the stored copy.
    async fn save(&self, thread: ConversationThread);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local [`SessionStore`].
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    policy: EvictionPolicy,
    threads: ThreadMap,
    locks: LockMap,
}

impl InMemorySessionStore {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Threads that currently have a lock entry.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn evict(&self, threads: &mut HashMap<ThreadId, ConversationThread>, keep: &ThreadId) {
        let EvictionPolicy::Capacity(max) = self.policy else {
            return;
        };
        while threads.len() > max {
            let oldest = threads
                .values()
                .filter(|t| &t.thread_id != keep)
                .min_by_key(|t| t.updated_at)
                .map(|t| t.thread_id.clone());
            let Some(oldest) = oldest else {
                break;
            };
            threads.remove(&oldest);
            debug!(thread_id = %oldest, "Evicted conversation thread");
            prune_lock(&self.locks, &oldest);
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn lock(&self, thread_id: &ThreadId) -> ThreadLock {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(thread_id.clone()).or_default())
        };
        let guard = lock.lock_owned().await;

        let threads = Arc::clone(&self.threads);
        let locks = Arc::clone(&self.locks);
        let id = thread_id.clone();
        // A thread that never got saved would otherwise keep its lock forever.
        ThreadLock::new(guard).on_release(move || {
            let saved = threads
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .contains_key(&id);
            if !saved {
                prune_lock(&locks, &id);
            }
        })
    }

    async fn load(&self, thread_id: &ThreadId) -> Option<ConversationThread> {
        self.threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(thread_id)
            .cloned()
    }

    async fn save(&self, thread: ConversationThread) {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        let id = thread.thread_id.clone();
        threads.insert(id.clone(), thread);
        self.evict(&mut threads, &id);
    }

    fn len(&self) -> usize {
        self.threads.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
