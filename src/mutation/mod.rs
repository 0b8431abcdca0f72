//! Optimistic read-state mutations.
//!
//! Every mutation captures its exact inverse before touching the store, so
//! a failed server confirmation rolls back by pure data replay rather than
//! re-derived logic. The coordinator is the only component permitted to
//! mark entries read.

use crate::api::NotificationApi;
use crate::error::Result;
use crate::models::Notification;
use crate::store::{MarkReadOutcome, NotificationStore};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Captured inverse of an optimistic mutation
enum Rollback {
    /// Reinsert prior entries, re-crediting the counter per undone flip
    Flips { priors: Vec<Notification> },
    /// Reinsert prior entries and restore the counter absolutely (mark-all
    /// also zeroed unreads the cache never held)
    Absolute {
        priors: Vec<Notification>,
        prior_count: u64,
    },
    /// Reinsert a removed entry
    Reinsert {
        entry: Box<Notification>,
        was_unread: bool,
    },
}

impl Rollback {
    async fn replay(self, store: &NotificationStore) {
        match self {
            Rollback::Flips { priors } => store.rollback_flips(priors).await,
            Rollback::Absolute { priors, prior_count } => {
                store.rollback_mark_all(priors, prior_count).await
            }
            Rollback::Reinsert { entry, was_unread } => {
                store.restore_removed(*entry, was_unread).await
            }
        }
    }
}

pub struct MutationCoordinator {
    store: Arc<NotificationStore>,
    api: Arc<dyn NotificationApi>,
}

impl MutationCoordinator {
    pub fn new(store: Arc<NotificationStore>, api: Arc<dyn NotificationApi>) -> Self {
        Self { store, api }
    }

    /// Mark a single notification read.
    ///
    /// Idempotent: a second call while already read is a no-op with no
    /// duplicate request. A server conflict (entity gone) removes the entry
    /// instead of rolling back; the counter already accounted for the read
    /// transition, so removal leaves it alone.
    pub async fn mark_read(&self, id: Uuid) -> Result<()> {
        let rollback = match self.store.apply_mark_read(id).await {
            MarkReadOutcome::AlreadyRead => {
                debug!(%id, "mark_read no-op, already read");
                return Ok(());
            }
            MarkReadOutcome::NotCached => {
                // Evicted or never hydrated; the server request still goes
                // out and the counter is left for reconciliation
                debug!(%id, "mark_read target not cached, confirming server-side only");
                None
            }
            MarkReadOutcome::Applied { prior } => Some(Rollback::Flips {
                priors: vec![prior],
            }),
        };

        match self.api.mark_read(id).await {
            Ok(confirmed) => {
                self.store.absorb_confirmed(confirmed).await;
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                info!(%id, "mark_read target gone server-side, removing from cache");
                self.store.remove_entry(id, false).await;
                Ok(())
            }
            Err(e) => {
                warn!(%id, "mark_read failed, rolling back: {}", e);
                if let Some(rollback) = rollback {
                    rollback.replay(&self.store).await;
                }
                Err(e)
            }
        }
    }

    /// Mark a whole group thread read as one atomic unit. Rollback restores
    /// the exact prior per-id map, not a blanket reset.
    pub async fn mark_group_read(&self, group_key: &str) -> Result<()> {
        let priors = self.store.apply_group_read(group_key).await;

        match self.api.mark_group_read(group_key).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                info!(group_key, "group gone server-side, removing cached members");
                self.store.remove_group(group_key).await;
                Ok(())
            }
            Err(e) => {
                warn!(group_key, "mark_group_read failed, rolling back: {}", e);
                Rollback::Flips { priors }.replay(&self.store).await;
                Err(e)
            }
        }
    }

    /// Mark everything read and zero the counter. On failure the captured
    /// per-id map is replayed exactly and the prior counter restored.
    pub async fn mark_all_read(&self) -> Result<()> {
        let (priors, prior_count) = self.store.apply_mark_all().await;

        match self.api.mark_all_read().await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("mark_all_read failed, rolling back: {}", e);
                Rollback::Absolute { priors, prior_count }
                    .replay(&self.store)
                    .await;
                Err(e)
            }
        }
    }

    /// Delete a notification. The optimistic removal decrements the counter
    /// when the entry was unread; a conflict means it was already gone and
    /// the removal stands.
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let rollback = self
            .store
            .remove_entry(id, true)
            .await
            .map(|(entry, was_unread)| Rollback::Reinsert {
                entry: Box::new(entry),
                was_unread,
            });

        match self.api.delete(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_conflict() => {
                debug!(%id, "delete target already gone server-side");
                Ok(())
            }
            Err(e) => {
                warn!(%id, "delete failed, rolling back: {}", e);
                if let Some(rollback) = rollback {
                    rollback.replay(&self.store).await;
                }
                Err(e)
            }
        }
    }
}
