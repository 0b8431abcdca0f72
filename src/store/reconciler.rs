//! Merge, dedup, and ordering rules shared by REST hydration and push-event
//! application.
//!
//! Both sources funnel through these helpers so the cache can never hold two
//! copies of one notification or regress a read-state already applied by a
//! fresher source.

use super::{StoreEvent, StoreInner};
use crate::models::{Notification, PushEvent};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Cache key enforcing the global order invariant: entries are totally
/// ordered by `(created_at desc, id desc)`, which makes pagination
/// boundaries deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryKey {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl EntryKey {
    pub fn of(n: &Notification) -> Self {
        Self {
            created_at: n.created_at,
            id: n.id,
        }
    }
}

impl Ord for EntryKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for EntryKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Insert or replace an entry at the position dictated by the order
/// invariant. Does not touch the unread counter.
pub(crate) fn insert(inner: &mut StoreInner, notification: Notification) {
    let key = EntryKey::of(&notification);
    if let Some(old_key) = inner.index.insert(notification.id, key) {
        if old_key != key {
            inner.entries.remove(&old_key);
        }
    }
    inner.tick += 1;
    inner.recency.insert(notification.id, inner.tick);
    inner.entries.insert(key, notification);
}

pub(crate) fn remove(inner: &mut StoreInner, id: Uuid) -> Option<Notification> {
    let key = inner.index.remove(&id)?;
    inner.recency.remove(&id);
    inner.entries.remove(&key)
}

pub(crate) fn get<'a>(inner: &'a StoreInner, id: &Uuid) -> Option<&'a Notification> {
    inner.index.get(id).and_then(|key| inner.entries.get(key))
}

/// Merge one fetched entry into the cache: upsert by id, last-writer-wins
/// by `updated_at`. A stale REST copy never reverts a read-state applied by
/// a newer push event or optimistic mutation. Counter is untouched; hydrate
/// carries its own authoritative count.
pub(crate) fn upsert_fetched(
    inner: &mut StoreInner,
    fetched: Notification,
) -> Option<StoreEvent> {
    if let Some(cached) = get(inner, &fetched.id) {
        if fetched.updated_at < cached.updated_at {
            debug!(id = %fetched.id, "stale fetched copy ignored");
            return None;
        }
        if *cached == fetched {
            return None;
        }
    }

    let event = StoreEvent::NotificationUpserted(Box::new(fetched.clone()));
    insert(inner, fetched);
    Some(event)
}

/// Flip an entry false -> true, stamping `updated_at` so later stale
/// fetches lose the merge. Returns whether a flip happened.
pub(crate) fn flip_read(inner: &mut StoreInner, id: Uuid) -> bool {
    let Some(key) = inner.index.get(&id).copied() else {
        return false;
    };
    let Some(entry) = inner.entries.get_mut(&key) else {
        return false;
    };
    if entry.is_read {
        return false;
    }
    entry.is_read = true;
    entry.updated_at = Utc::now();
    inner.tick += 1;
    inner.recency.insert(id, inner.tick);
    true
}

/// Decrement the unread counter, clamping at zero. A clamp means local
/// state has drifted from the server and schedules a reconciliation pass.
pub(crate) fn decrement_unread(inner: &mut StoreInner, by: u64) -> bool {
    if by == 0 {
        return false;
    }
    if by > inner.unread {
        warn!(
            counter = inner.unread,
            decrement = by,
            "unread counter would go negative, clamping and scheduling reconcile"
        );
        inner.unread = 0;
        inner.needs_reconcile = true;
    } else {
        inner.unread -= by;
    }
    true
}

/// Apply one push event against the cache. The counter is authoritative
/// independent of cache membership: a read event whose targets were evicted
/// still decrements by the delta the payload states.
pub(crate) fn apply_event(inner: &mut StoreInner, event: PushEvent) -> Vec<StoreEvent> {
    let mut events = Vec::new();

    match event {
        PushEvent::New { notification } => {
            if inner.index.contains_key(&notification.id) {
                debug!(id = %notification.id, "duplicate push delivery discarded");
                return events;
            }
            let unread = !notification.is_read;
            events.push(StoreEvent::NotificationUpserted(notification.clone()));
            insert(inner, *notification);
            if unread {
                inner.unread += 1;
                events.push(StoreEvent::UnreadCountChanged(inner.unread));
            }
        }

        PushEvent::Read { ids, unread_delta } => {
            let mut flips: u64 = 0;
            let mut cached: u64 = 0;
            for id in ids {
                if inner.index.contains_key(&id) {
                    cached += 1;
                }
                if flip_read(inner, id) {
                    flips += 1;
                    if let Some(entry) = get(inner, &id) {
                        events.push(StoreEvent::NotificationUpserted(Box::new(entry.clone())));
                    }
                }
            }
            // The stated delta only covers targets the cache cannot account
            // for. A cached target either flips here or already decremented
            // when it was first read, so a redelivered event contributes
            // nothing for it.
            let uncached_share = unread_delta
                .map(|delta| delta.saturating_sub(cached))
                .unwrap_or(0);
            if decrement_unread(inner, flips + uncached_share) {
                events.push(StoreEvent::UnreadCountChanged(inner.unread));
            }
        }

        PushEvent::GroupRead {
            group_key,
            unread_delta,
        } => {
            let members: Vec<Uuid> = inner
                .entries
                .values()
                .filter(|n| n.group_key.as_deref() == Some(group_key.as_str()))
                .map(|n| n.id)
                .collect();
            let cached = members.len() as u64;

            let mut flips: u64 = 0;
            for id in members {
                if flip_read(inner, id) {
                    flips += 1;
                    if let Some(entry) = get(inner, &id) {
                        events.push(StoreEvent::NotificationUpserted(Box::new(entry.clone())));
                    }
                }
            }
            // Same accounting as Read: the delta share past the cached
            // members covers targets this cache never held
            let uncached_share = unread_delta
                .map(|delta| delta.saturating_sub(cached))
                .unwrap_or(0);
            if decrement_unread(inner, flips + uncached_share) {
                events.push(StoreEvent::UnreadCountChanged(inner.unread));
            }
        }

        PushEvent::ReadAll => {
            let ids: Vec<Uuid> = inner
                .entries
                .values()
                .filter(|n| !n.is_read)
                .map(|n| n.id)
                .collect();
            for id in ids {
                if flip_read(inner, id) {
                    if let Some(entry) = get(inner, &id) {
                        events.push(StoreEvent::NotificationUpserted(Box::new(entry.clone())));
                    }
                }
            }
            if inner.unread != 0 {
                inner.unread = 0;
                events.push(StoreEvent::UnreadCountChanged(0));
            }
        }
    }

    events
}

/// Evict least-recently-touched entries until the cache is back under its
/// bound. Eviction is a cache-lifecycle concern only; it never mutates the
/// unread counter.
pub(crate) fn evict_over_capacity(inner: &mut StoreInner, capacity: usize) {
    while inner.entries.len() > capacity {
        let Some(victim) = inner
            .recency
            .iter()
            .min_by_key(|(_, tick)| **tick)
            .map(|(id, _)| *id)
        else {
            return;
        };
        debug!(id = %victim, "evicting least-recently-used cache entry");
        remove(inner, victim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NotificationPriority, NotificationType};
    use chrono::TimeZone;

    fn inner() -> StoreInner {
        StoreInner::new()
    }

    fn notification(created_secs: i64, is_read: bool) -> Notification {
        let ts = Utc.timestamp_opt(created_secs, 0).unwrap();
        Notification {
            id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            notification_type: NotificationType::System,
            title: "t".to_string(),
            message: "m".to_string(),
            course_id: None,
            group_id: None,
            message_id: None,
            sender: None,
            is_read,
            priority: NotificationPriority::Normal,
            group_key: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_order_newest_first_with_id_tiebreak() {
        let mut inner = inner();
        let old = notification(100, false);
        let new = notification(200, false);
        let mut same_a = notification(150, false);
        let mut same_b = notification(150, false);
        same_a.id = Uuid::from_u128(1);
        same_b.id = Uuid::from_u128(2);

        for n in [old.clone(), new.clone(), same_a.clone(), same_b.clone()] {
            insert(&mut inner, n);
        }

        let ids: Vec<Uuid> = inner.entries.values().map(|n| n.id).collect();
        assert_eq!(ids, vec![new.id, same_b.id, same_a.id, old.id]);
    }

    #[test]
    fn test_upsert_fetched_stale_copy_loses() {
        let mut inner = inner();
        let mut cached = notification(100, true);
        cached.updated_at = Utc.timestamp_opt(300, 0).unwrap();
        let id = cached.id;
        insert(&mut inner, cached);

        // Same entry as the REST source saw it before the read flip
        let mut stale = notification(100, false);
        stale.id = id;
        stale.updated_at = Utc.timestamp_opt(200, 0).unwrap();

        assert!(upsert_fetched(&mut inner, stale).is_none());
        assert!(get(&inner, &id).unwrap().is_read);
    }

    #[test]
    fn test_upsert_fetched_fresher_copy_wins() {
        let mut inner = inner();
        let cached = notification(100, false);
        let id = cached.id;
        insert(&mut inner, cached);

        let mut fresher = notification(100, true);
        fresher.id = id;
        fresher.updated_at = Utc.timestamp_opt(400, 0).unwrap();

        assert!(upsert_fetched(&mut inner, fresher).is_some());
        assert!(get(&inner, &id).unwrap().is_read);
    }

    #[test]
    fn test_new_event_dedup() {
        let mut inner = inner();
        let n = notification(100, false);

        let first = apply_event(
            &mut inner,
            PushEvent::New {
                notification: Box::new(n.clone()),
            },
        );
        let second = apply_event(
            &mut inner,
            PushEvent::New {
                notification: Box::new(n),
            },
        );

        assert_eq!(inner.entries.len(), 1);
        assert_eq!(inner.unread, 1);
        assert!(!first.is_empty());
        assert!(second.is_empty());
    }

    #[test]
    fn test_read_event_decrements_exactly_per_flip() {
        let mut inner = inner();
        let a = notification(100, false);
        let b = notification(200, true);
        inner.unread = 1;
        let (a_id, b_id) = (a.id, b.id);
        insert(&mut inner, a);
        insert(&mut inner, b);

        // b is already read; only a flips
        apply_event(
            &mut inner,
            PushEvent::Read {
                ids: vec![a_id, b_id],
                unread_delta: None,
            },
        );

        assert_eq!(inner.unread, 0);
        assert!(get(&inner, &a_id).unwrap().is_read);
    }

    #[test]
    fn test_read_event_uncached_target_uses_stated_delta() {
        let mut inner = inner();
        inner.unread = 3;

        apply_event(
            &mut inner,
            PushEvent::Read {
                ids: vec![Uuid::new_v4(), Uuid::new_v4()],
                unread_delta: Some(2),
            },
        );

        assert_eq!(inner.unread, 1);
        assert!(!inner.needs_reconcile);
    }

    #[test]
    fn test_redelivered_read_event_decrements_nothing() {
        let mut inner = inner();
        let n = notification(100, false);
        let id = n.id;
        inner.unread = 5;
        insert(&mut inner, n);

        let event = PushEvent::Read {
            ids: vec![id],
            unread_delta: Some(1),
        };
        apply_event(&mut inner, event.clone());
        assert_eq!(inner.unread, 4);

        // At-least-once delivery: the same event again must be a no-op
        apply_event(&mut inner, event);
        assert_eq!(inner.unread, 4);
        assert!(!inner.needs_reconcile);
    }

    #[test]
    fn test_redelivered_group_read_decrements_nothing() {
        let mut inner = inner();
        let mut a = notification(100, false);
        let mut b = notification(200, false);
        a.group_key = Some("thread-9".to_string());
        b.group_key = Some("thread-9".to_string());
        inner.unread = 5;
        insert(&mut inner, a);
        insert(&mut inner, b);

        let event = PushEvent::GroupRead {
            group_key: "thread-9".to_string(),
            unread_delta: Some(2),
        };
        apply_event(&mut inner, event.clone());
        assert_eq!(inner.unread, 3);

        apply_event(&mut inner, event);
        assert_eq!(inner.unread, 3);
    }

    #[test]
    fn test_read_event_mixed_cached_and_evicted_targets() {
        let mut inner = inner();
        let cached = notification(100, false);
        let cached_id = cached.id;
        inner.unread = 4;
        insert(&mut inner, cached);

        // One cached flip plus one evicted target covered by the delta
        apply_event(
            &mut inner,
            PushEvent::Read {
                ids: vec![cached_id, Uuid::new_v4()],
                unread_delta: Some(2),
            },
        );

        assert_eq!(inner.unread, 2);
        assert!(get(&inner, &cached_id).unwrap().is_read);
    }

    #[test]
    fn test_counter_clamps_and_flags_reconcile() {
        let mut inner = inner();
        inner.unread = 1;

        apply_event(
            &mut inner,
            PushEvent::Read {
                ids: vec![Uuid::new_v4()],
                unread_delta: Some(5),
            },
        );

        assert_eq!(inner.unread, 0);
        assert!(inner.needs_reconcile);
    }

    #[test]
    fn test_group_read_flips_whole_thread() {
        let mut inner = inner();
        let mut a = notification(100, false);
        let mut b = notification(200, false);
        let c = notification(300, false);
        a.group_key = Some("course-42".to_string());
        b.group_key = Some("course-42".to_string());
        inner.unread = 3;
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        insert(&mut inner, a);
        insert(&mut inner, b);
        insert(&mut inner, c);

        apply_event(
            &mut inner,
            PushEvent::GroupRead {
                group_key: "course-42".to_string(),
                unread_delta: None,
            },
        );

        assert!(get(&inner, &a_id).unwrap().is_read);
        assert!(get(&inner, &b_id).unwrap().is_read);
        assert!(!get(&inner, &c_id).unwrap().is_read);
        assert_eq!(inner.unread, 1);
    }

    #[test]
    fn test_read_all_zeroes_counter() {
        let mut inner = inner();
        insert(&mut inner, notification(100, false));
        insert(&mut inner, notification(200, false));
        inner.unread = 7; // includes uncached unreads

        apply_event(&mut inner, PushEvent::ReadAll);

        assert_eq!(inner.unread, 0);
        assert!(inner.entries.values().all(|n| n.is_read));
    }

    #[test]
    fn test_eviction_never_touches_counter() {
        let mut inner = inner();
        inner.unread = 5;
        for i in 0..6 {
            insert(&mut inner, notification(100 + i, false));
        }

        evict_over_capacity(&mut inner, 3);

        assert_eq!(inner.entries.len(), 3);
        assert_eq!(inner.index.len(), 3);
        assert_eq!(inner.unread, 5);
    }

    #[test]
    fn test_eviction_prefers_least_recently_touched() {
        let mut inner = inner();
        let first = notification(100, false);
        let first_id = first.id;
        insert(&mut inner, first);
        for i in 1..4 {
            insert(&mut inner, notification(100 + i, false));
        }
        // Touch the oldest so it survives
        flip_read(&mut inner, first_id);

        evict_over_capacity(&mut inner, 3);

        assert!(get(&inner, &first_id).is_some());
    }
}
