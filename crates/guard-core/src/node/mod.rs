//! Node bindings: a store key paired with the live upstream target.
//!
//! The target sits behind a reader-writer lock. Dispatch holds the read lock for the whole
//! request rewrite (see [`NodeBinding::with_target`]); the admin surface holds the write lock only
//! for the in-memory swap. Admin updates are additionally serialized by an async mutex so that the
//! in-memory swap and the store write happen in the same order for every caller.

use crate::{
    config::NodeSettings,
    store::{ConfigStore, StoreError},
    types::{NodeRole, UpstreamTarget},
};
use parking_lot::RwLock;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

#[derive(Debug)]
pub struct NodeBinding {
    key: String,
    role: NodeRole,
    store_backed: bool,
    admin_path: String,
    defaults: UpstreamTarget,
    target: RwLock<UpstreamTarget>,
    update_lock: Mutex<()>,
}

impl NodeBinding {
    /// Creates a binding whose live target starts as `target`.
    #[must_use]
    pub fn new(settings: NodeSettings, target: UpstreamTarget) -> Self {
        Self {
            key: settings.key,
            role: settings.role,
            store_backed: settings.store_backed,
            admin_path: settings.admin_path,
            defaults: settings.defaults,
            target: RwLock::new(target),
            update_lock: Mutex::new(()),
        }
    }

    /// Resolves the initial target and builds the binding.
    ///
    /// Store-backed bindings adopt the stored target when one exists and otherwise persist the
    /// environment defaults. Local bindings never touch the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store cannot be read or written, or holds an invalid URL.
    pub async fn bring_up(
        settings: NodeSettings,
        store: &dyn ConfigStore,
    ) -> Result<Self, StoreError> {
        if !settings.store_backed {
            let target = settings.defaults.clone();
            info!(key = %settings.key, role = %settings.role, upstream = target.raw_url(), "node binding ready");
            return Ok(Self::new(settings, target));
        }

        let target = match store.get(&settings.key).await? {
            Some(record) => {
                let target = record.into_target()?;
                if target != settings.defaults {
                    warn!(
                        key = %settings.key,
                        stored = target.raw_url(),
                        env = settings.defaults.raw_url(),
                        "stored config overrides environment"
                    );
                }
                target
            }
            None => {
                store.create(&settings.key, &settings.defaults.to_payload()).await?;
                info!(key = %settings.key, "persisted initial node config");
                settings.defaults.clone()
            }
        };

        info!(key = %settings.key, role = %settings.role, upstream = target.raw_url(), "node binding ready");
        Ok(Self::new(settings, target))
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn role(&self) -> NodeRole {
        self.role
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.role == NodeRole::Local
    }

    #[must_use]
    pub fn store_backed(&self) -> bool {
        self.store_backed
    }

    #[must_use]
    pub fn admin_path(&self) -> &str {
        &self.admin_path
    }

    /// Environment-provided target used when an admin update omits the url.
    #[must_use]
    pub fn defaults(&self) -> &UpstreamTarget {
        &self.defaults
    }

    /// Consistent copy of the live target.
    #[must_use]
    pub fn snapshot(&self) -> UpstreamTarget {
        self.target.read().clone()
    }

    /// Runs `f` against the live target while holding the shared read lock.
    ///
    /// `f` must not block or await; it sees either the old or the new target in full.
    pub fn with_target<R>(&self, f: impl FnOnce(&UpstreamTarget) -> R) -> R {
        let guard = self.target.read();
        f(&guard)
    }

    /// Swaps the live target under the write lock.
    pub fn replace(&self, target: UpstreamTarget) {
        *self.target.write() = target;
    }

    /// Serializes admin updates against one another across the store write.
    pub async fn lock_updates(&self) -> MutexGuard<'_, ()> {
        self.update_lock.lock().await
    }
}
