//! A per-key single-flight gate.
//!
//! Unlike a mutex, nobody ever waits on a [`ChokePoint`]: the first caller for a key gets a
//! [`Pass`], and every other caller for the same key is turned away until that pass is dropped.
//! Dropping the pass is the only way to release the key, so it is released on every exit path,
//! including early returns, `?` and panics.

use dashmap::DashSet;
use std::hash::Hash;
use std::sync::Arc;

pub struct ChokePoint<K> {
    held: Arc<DashSet<K>>,
}

/// A gate with a single slot, for process-wide locks.
pub type Latch = ChokePoint<()>;

/// Proof that the holder is the only one inside the chokepoint for `key`.
#[must_use = "the key is released as soon as the pass is dropped"]
pub struct Pass<K: Eq + Hash> {
    held: Arc<DashSet<K>>,
    key: K,
}

impl<K> ChokePoint<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            held: Arc::new(DashSet::new()),
        }
    }

    /// Claim `key`, or return `None` if someone else already holds it.
    pub fn try_enter(&self, key: K) -> Option<Pass<K>> {
        if !self.held.insert(key.clone()) {
            return None;
        }
        Some(Pass {
            held: Arc::clone(&self.held),
            key,
        })
    }

    pub fn is_held(&self, key: &K) -> bool {
        self.held.contains(key)
    }

    /// Run `work` while holding `key`. Returns `None` without polling `work` if the key was taken.
    pub async fn run<F, T>(&self, key: K, work: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        let _pass = self.try_enter(key)?;
        Some(work.await)
    }
}

impl<K> Default for ChokePoint<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for ChokePoint<K> {
    fn clone(&self) -> Self {
        Self {
            held: Arc::clone(&self.held),
        }
    }
}

impl<K: Eq + Hash> std::fmt::Debug for ChokePoint<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChokePoint")
            .field("held", &self.held.len())
            .finish()
    }
}

impl<K: Eq + Hash> Drop for Pass<K> {
    fn drop(&mut self) {
        self.held.remove(&self.key);
    }
}
