//! In-memory authoritative cache of notification entities.
//!
//! The store owns the cache, the unread counter, and the pagination cursor.
//! All three are mutated only through the documented paths: hydrate-merge,
//! push-apply, and the mutation coordinator. Every mutation runs to
//! completion under the write guard, so readers observe either the pre- or
//! the fully-applied post-state, never a partial one.

pub(crate) mod reconciler;

use crate::api::NotificationApi;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::models::{Notification, NotificationPage, PageCursor, PushEvent};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reconciler::EntryKey;

/// Change events exposed to consumers (UI or other modules)
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    UnreadCountChanged(u64),
    NotificationUpserted(Box<Notification>),
    NotificationRemoved(Uuid),
}

pub(crate) struct StoreInner {
    /// Entries totally ordered by `(created_at desc, id desc)`
    entries: BTreeMap<EntryKey, Notification>,
    /// id -> position key, for O(log n) upsert-by-id
    index: HashMap<Uuid, EntryKey>,
    /// id -> last-touched tick, for LRU eviction
    recency: HashMap<Uuid, u64>,
    tick: u64,
    /// Independently tracked: the cache is bounded and lossy, so this is
    /// not derivable from `entries`
    unread: u64,
    cursor: Option<PageCursor>,
    hydrated: bool,
    /// Push events that arrived before the first successful hydrate,
    /// replayed in arrival order right after the merge
    pending: VecDeque<PushEvent>,
    /// Highest hydrate sequence number applied so far
    applied_seq: u64,
    needs_reconcile: bool,
}

impl StoreInner {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
            recency: HashMap::new(),
            tick: 0,
            unread: 0,
            cursor: None,
            hydrated: false,
            pending: VecDeque::new(),
            applied_seq: 0,
            needs_reconcile: false,
        }
    }
}

/// Outcome of an optimistic mark-read capture
pub(crate) enum MarkReadOutcome {
    /// Flipped; the captured prior entry is the exact inverse
    Applied { prior: Notification },
    /// Already read: no-op, no duplicate request
    AlreadyRead,
    /// Not in cache (evicted or never hydrated)
    NotCached,
}

pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    capacity: usize,
    inner: RwLock<StoreInner>,
    /// Monotonic sequence issued per hydrate request; stale responses are
    /// discarded on resolution
    hydrate_seq: AtomicU64,
    subscribers: StdMutex<Vec<mpsc::UnboundedSender<StoreEvent>>>,
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>, config: StoreConfig) -> Self {
        Self {
            api,
            capacity: config.cache_capacity,
            inner: RwLock::new(StoreInner::new()),
            hydrate_seq: AtomicU64::new(0),
            subscribers: StdMutex::new(Vec::new()),
        }
    }

    /// Subscribe to store change events
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    fn emit(&self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock().unwrap();
        for event in events {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub async fn unread_count(&self) -> u64 {
        self.inner.read().await.unread
    }

    /// Snapshot of the cache in global order (newest first)
    pub async fn snapshot(&self) -> Vec<Notification> {
        self.inner.read().await.entries.values().cloned().collect()
    }

    pub async fn get(&self, id: Uuid) -> Option<Notification> {
        let inner = self.inner.read().await;
        reconciler::get(&inner, &id).cloned()
    }

    pub async fn cursor(&self) -> Option<PageCursor> {
        self.inner.read().await.cursor.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_hydrated(&self) -> bool {
        self.inner.read().await.hydrated
    }

    pub async fn needs_reconcile(&self) -> bool {
        self.inner.read().await.needs_reconcile
    }

    // ---------------------------------------------------------------
    // Hydration
    // ---------------------------------------------------------------

    /// Fetch a page from the REST source and merge it into the cache.
    ///
    /// Returns `None` when the response was superseded by a fresher hydrate
    /// that already resolved; stale results never overwrite fresher state.
    pub async fn hydrate(
        &self,
        page: u32,
        limit: u32,
        unread_only: bool,
    ) -> Result<Option<NotificationPage>> {
        let seq = self.hydrate_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let fetched = self.api.list(page, limit, unread_only).await?;

        let mut events = Vec::new();
        {
            let mut inner = self.inner.write().await;
            if seq < inner.applied_seq {
                debug!(seq, applied = inner.applied_seq, "stale hydrate discarded");
                return Ok(None);
            }
            inner.applied_seq = seq;

            for notification in &fetched.data {
                events.extend(reconciler::upsert_fetched(&mut inner, notification.clone()));
            }

            // Hydrate carries the authoritative unread count
            if inner.unread != fetched.unread_count {
                inner.unread = fetched.unread_count;
                events.push(StoreEvent::UnreadCountChanged(inner.unread));
            }
            inner.cursor = Some(fetched.pagination.clone());

            if !inner.hydrated {
                inner.hydrated = true;
                let buffered: Vec<PushEvent> = inner.pending.drain(..).collect();
                if !buffered.is_empty() {
                    info!(count = buffered.len(), "replaying buffered push events");
                }
                for event in buffered {
                    events.extend(reconciler::apply_event(&mut inner, event));
                }
            }

            reconciler::evict_over_capacity(&mut inner, self.capacity);
        }

        self.emit(events);
        Ok(Some(fetched))
    }

    // ---------------------------------------------------------------
    // Push-event application
    // ---------------------------------------------------------------

    /// Apply one push event. Events received before the first successful
    /// hydrate are buffered and replayed against the merged cache.
    pub async fn apply_push_event(&self, event: PushEvent) {
        let events = {
            let mut inner = self.inner.write().await;
            if !inner.hydrated {
                debug!("buffering push event until first hydrate");
                inner.pending.push_back(event);
                return;
            }
            let events = reconciler::apply_event(&mut inner, event);
            reconciler::evict_over_capacity(&mut inner, self.capacity);
            events
        };
        self.emit(events);
    }

    // ---------------------------------------------------------------
    // Reconciliation
    // ---------------------------------------------------------------

    /// Fetch the authoritative unread count; if it differs from the local
    /// counter the server value wins and the first page is re-hydrated to
    /// resynchronize entry-level state.
    pub async fn reconcile_unread_count(&self) -> Result<()> {
        let count = self.api.unread_count().await?;

        let (diverged, limit) = {
            let mut inner = self.inner.write().await;
            inner.needs_reconcile = false;
            let limit = inner.cursor.as_ref().map(|c| c.limit).unwrap_or(20);
            if inner.unread != count {
                info!(local = inner.unread, server = count, "unread counter drifted, resyncing");
                inner.unread = count;
                (true, limit)
            } else {
                (false, limit)
            }
        };

        if diverged {
            self.emit(vec![StoreEvent::UnreadCountChanged(count)]);
            self.hydrate(1, limit, false).await?;
        }

        Ok(())
    }

    /// Periodic reconciliation loop. Runs every `interval` and also picks
    /// up any clamp-scheduled reconcile between ticks.
    pub fn spawn_reconciler(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = store.reconcile_unread_count().await {
                    warn!("periodic unread reconciliation failed: {}", e);
                }
            }
        })
    }

    // ---------------------------------------------------------------
    // Mutation primitives (used only by the MutationCoordinator)
    // ---------------------------------------------------------------

    pub(crate) async fn apply_mark_read(&self, id: Uuid) -> MarkReadOutcome {
        let (outcome, events) = {
            let mut inner = self.inner.write().await;
            match reconciler::get(&inner, &id).cloned() {
                None => (MarkReadOutcome::NotCached, Vec::new()),
                Some(prior) if prior.is_read => (MarkReadOutcome::AlreadyRead, Vec::new()),
                Some(prior) => {
                    let mut events = Vec::new();
                    reconciler::flip_read(&mut inner, id);
                    if let Some(updated) = reconciler::get(&inner, &id) {
                        events.push(StoreEvent::NotificationUpserted(Box::new(updated.clone())));
                    }
                    if reconciler::decrement_unread(&mut inner, 1) {
                        events.push(StoreEvent::UnreadCountChanged(inner.unread));
                    }
                    (MarkReadOutcome::Applied { prior }, events)
                }
            }
        };
        self.emit(events);
        outcome
    }

    /// Flip every unread member of a group thread, capturing the exact
    /// prior entries for rollback. Members may have had independent prior
    /// states; only the flipped ones need restoring.
    pub(crate) async fn apply_group_read(&self, group_key: &str) -> Vec<Notification> {
        let (priors, events) = {
            let mut inner = self.inner.write().await;
            let members: Vec<Uuid> = inner
                .entries
                .values()
                .filter(|n| n.group_key.as_deref() == Some(group_key))
                .map(|n| n.id)
                .collect();

            let mut priors = Vec::new();
            let mut events = Vec::new();
            for id in members {
                let prior = reconciler::get(&inner, &id).cloned();
                if reconciler::flip_read(&mut inner, id) {
                    if let Some(prior) = prior {
                        priors.push(prior);
                    }
                    if let Some(updated) = reconciler::get(&inner, &id) {
                        events.push(StoreEvent::NotificationUpserted(Box::new(updated.clone())));
                    }
                }
            }
            if reconciler::decrement_unread(&mut inner, priors.len() as u64) {
                events.push(StoreEvent::UnreadCountChanged(inner.unread));
            }
            (priors, events)
        };
        self.emit(events);
        priors
    }

    /// Flip everything and zero the counter, capturing the prior per-entry
    /// map and the prior counter value (the counter also covered uncached
    /// unreads, so rollback must restore it absolutely).
    pub(crate) async fn apply_mark_all(&self) -> (Vec<Notification>, u64) {
        let (priors, prior_count, events) = {
            let mut inner = self.inner.write().await;
            let prior_count = inner.unread;
            let unread_ids: Vec<Uuid> = inner
                .entries
                .values()
                .filter(|n| !n.is_read)
                .map(|n| n.id)
                .collect();

            let mut priors = Vec::new();
            let mut events = Vec::new();
            for id in unread_ids {
                let prior = reconciler::get(&inner, &id).cloned();
                if reconciler::flip_read(&mut inner, id) {
                    if let Some(prior) = prior {
                        priors.push(prior);
                    }
                    if let Some(updated) = reconciler::get(&inner, &id) {
                        events.push(StoreEvent::NotificationUpserted(Box::new(updated.clone())));
                    }
                }
            }
            if inner.unread != 0 {
                inner.unread = 0;
                events.push(StoreEvent::UnreadCountChanged(0));
            }
            (priors, prior_count, events)
        };
        self.emit(events);
        (priors, prior_count)
    }

    /// Replay captured prior entries, re-crediting the counter by one per
    /// undone flip.
    pub(crate) async fn rollback_flips(&self, priors: Vec<Notification>) {
        if priors.is_empty() {
            return;
        }
        let events = {
            let mut inner = self.inner.write().await;
            let mut events = Vec::new();
            let mut restored: u64 = 0;
            for prior in priors {
                if !prior.is_read {
                    restored += 1;
                }
                events.push(StoreEvent::NotificationUpserted(Box::new(prior.clone())));
                reconciler::insert(&mut inner, prior);
            }
            inner.unread += restored;
            events.push(StoreEvent::UnreadCountChanged(inner.unread));
            events
        };
        self.emit(events);
    }

    /// Replay a mark-all capture: prior entries plus the absolute prior
    /// counter value.
    pub(crate) async fn rollback_mark_all(&self, priors: Vec<Notification>, prior_count: u64) {
        let events = {
            let mut inner = self.inner.write().await;
            let mut events = Vec::new();
            for prior in priors {
                events.push(StoreEvent::NotificationUpserted(Box::new(prior.clone())));
                reconciler::insert(&mut inner, prior);
            }
            if inner.unread != prior_count {
                inner.unread = prior_count;
                events.push(StoreEvent::UnreadCountChanged(prior_count));
            }
            events
        };
        self.emit(events);
    }

    /// Remove an entry. `adjust_counter` is set for user-initiated deletes
    /// (an unread delete reduces the unread population); conflict cleanup
    /// leaves the counter at its optimistic value.
    pub(crate) async fn remove_entry(
        &self,
        id: Uuid,
        adjust_counter: bool,
    ) -> Option<(Notification, bool)> {
        let (removed, events) = {
            let mut inner = self.inner.write().await;
            let Some(removed) = reconciler::remove(&mut inner, id) else {
                return None;
            };
            let was_unread = !removed.is_read;
            let mut events = vec![StoreEvent::NotificationRemoved(id)];
            if adjust_counter && was_unread && reconciler::decrement_unread(&mut inner, 1) {
                events.push(StoreEvent::UnreadCountChanged(inner.unread));
            }
            ((removed, was_unread), events)
        };
        self.emit(events);
        Some(removed)
    }

    /// Remove every cached member of a group thread without touching the
    /// counter (conflict cleanup after an optimistic group read).
    pub(crate) async fn remove_group(&self, group_key: &str) {
        let events = {
            let mut inner = self.inner.write().await;
            let members: Vec<Uuid> = inner
                .entries
                .values()
                .filter(|n| n.group_key.as_deref() == Some(group_key))
                .map(|n| n.id)
                .collect();
            let mut events = Vec::new();
            for id in members {
                if reconciler::remove(&mut inner, id).is_some() {
                    events.push(StoreEvent::NotificationRemoved(id));
                }
            }
            events
        };
        self.emit(events);
    }

    /// Reinsert a removed entry, re-crediting the counter if it was unread
    pub(crate) async fn restore_removed(&self, entry: Notification, was_unread: bool) {
        let events = {
            let mut inner = self.inner.write().await;
            let mut events = vec![StoreEvent::NotificationUpserted(Box::new(entry.clone()))];
            reconciler::insert(&mut inner, entry);
            if was_unread {
                inner.unread += 1;
                events.push(StoreEvent::UnreadCountChanged(inner.unread));
            }
            events
        };
        self.emit(events);
    }

    /// Merge a server-confirmed copy of an entry (last-writer-wins). The
    /// counter is untouched; the optimistic path already accounted for it.
    pub(crate) async fn absorb_confirmed(&self, confirmed: Notification) {
        let events = {
            let mut inner = self.inner.write().await;
            let events: Vec<StoreEvent> = reconciler::upsert_fetched(&mut inner, confirmed)
                .into_iter()
                .collect();
            reconciler::evict_over_capacity(&mut inner, self.capacity);
            events
        };
        self.emit(events);
    }
}
