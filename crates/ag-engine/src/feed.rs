//! Notification feed reconciler.
//!
//! Two producers feed one list:
//! - **poll**: a top-N snapshot. Every record is upserted by id and the
//!   server wins on `read`. Local entries missing from the batch are kept,
//!   since the batch is a window, not the whole set.
//! - **push**: single insert events. Novel ids are inserted in order and
//!   alerted; repeats are ignored. An id only leaves the feed through
//!   `remove`, which tombstones it, so no id is ever alerted twice.
//!
//! Entries stay sorted by `created_at` descending, ties by id descending.
//! The unread count is always derived from the entries.

use std::cmp::Ordering;
use std::collections::HashSet;

use ag_core::{Notification, NotificationId, Result, SyncError};
use chrono::{DateTime, Utc};

use crate::optimistic::Replica;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    entries: Vec<Notification>,
    /// Deleted locally; late deliveries of these ids are dropped.
    tombstones: HashSet<NotificationId>,
    last_sync: Option<DateTime<Utc>>,
}

/// What a push delivery did to the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEffect {
    /// Novel id, inserted; the caller alerts.
    Inserted,
    Duplicate,
    /// Id was deleted locally.
    Suppressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub suppressed: usize,
}

impl PollReport {
    pub fn merge(&mut self, other: PollReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.suppressed += other.suppressed;
    }

    pub fn changed(&self) -> bool {
        self.inserted + self.updated > 0
    }
}

/// Newest first; equal timestamps fall back to the larger id first.
fn feed_order(a: &Notification, b: &Notification) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

impl FeedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|n| !n.read).count()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.entries.iter().find(|n| &n.id == id)
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.get(id).is_some()
    }

    fn position(&self, id: &NotificationId) -> Option<usize> {
        self.entries.iter().position(|n| &n.id == id)
    }

    fn insert_sorted(&mut self, notification: Notification) {
        let at = self
            .entries
            .partition_point(|e| feed_order(e, &notification) == Ordering::Less);
        self.entries.insert(at, notification);
    }

    /// Replace-or-insert. Returns `None` if nothing changed.
    fn upsert(&mut self, notification: Notification) -> Option<bool> {
        match self.position(&notification.id) {
            Some(i) if self.entries[i] == notification => None,
            Some(i) => {
                self.entries.remove(i);
                self.insert_sorted(notification);
                Some(false)
            }
            None => {
                self.insert_sorted(notification);
                Some(true)
            }
        }
    }

    pub fn apply_push(&mut self, notification: Notification) -> PushEffect {
        if self.tombstones.contains(&notification.id) {
            return PushEffect::Suppressed;
        }
        if self.contains(&notification.id) {
            return PushEffect::Duplicate;
        }
        self.insert_sorted(notification);
        PushEffect::Inserted
    }

    pub fn apply_poll(&mut self, batch: Vec<Notification>, synced_at: DateTime<Utc>) -> PollReport {
        let mut report = PollReport::default();
        for notification in batch {
            if self.tombstones.contains(&notification.id) {
                report.suppressed += 1;
                continue;
            }
            match self.upsert(notification) {
                Some(true) => report.inserted += 1,
                Some(false) => report.updated += 1,
                None => report.unchanged += 1,
            }
        }
        self.last_sync = Some(synced_at);
        report
    }

    /// Idempotent.
    pub fn mark_read(&mut self, id: &NotificationId) -> Result<()> {
        let i = self
            .position(id)
            .ok_or_else(|| SyncError::NotFound("Notification".into(), id.to_string()))?;
        self.entries[i].read = true;
        Ok(())
    }

    /// Marks every entry read and returns the ids that flipped.
    pub fn mark_all_read(&mut self) -> Vec<NotificationId> {
        self.entries
            .iter_mut()
            .filter(|n| !n.read)
            .map(|n| {
                n.read = true;
                n.id.clone()
            })
            .collect()
    }

    pub fn remove(&mut self, id: &NotificationId) -> Result<Notification> {
        let i = self
            .position(id)
            .ok_or_else(|| SyncError::NotFound("Notification".into(), id.to_string()))?;
        self.tombstones.insert(id.clone());
        Ok(self.entries.remove(i))
    }
}

/// One feed entry as seen by the mutation coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub notification: Option<Notification>,
    pub tombstoned: bool,
}

impl Replica<NotificationId> for FeedState {
    type Entity = FeedEntry;

    fn read_entity(&self, key: &NotificationId) -> FeedEntry {
        FeedEntry {
            notification: self.get(key).cloned(),
            tombstoned: self.tombstones.contains(key),
        }
    }

    fn write_entity(&mut self, key: &NotificationId, entity: FeedEntry) {
        if entity.tombstoned {
            self.tombstones.insert(key.clone());
        } else {
            self.tombstones.remove(key);
        }
        match entity.notification {
            Some(n) => {
                self.upsert(n);
            }
            None => {
                if let Some(i) = self.position(key) {
                    self.entries.remove(i);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ag_core::{NotificationKind, UserId};
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn note(id: &str, minute: i64, read: bool) -> Notification {
        Notification {
            id: NotificationId::from(id),
            user_id: UserId::from("u1"),
            kind: NotificationKind::ForumReply,
            title: format!("title {id}"),
            content: String::new(),
            action_url: None,
            read,
            created_at: at(minute),
        }
    }

    fn ids(feed: &FeedState) -> Vec<&str> {
        feed.entries().iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn push_then_poll_dedups() {
        let mut feed = FeedState::new();
        assert_eq!(feed.apply_push(note("n1", 1, false)), PushEffect::Inserted);
        let report = feed.apply_poll(vec![note("n1", 1, true), note("n2", 2, false)], at(3));

        assert_eq!(ids(&feed), vec!["n2", "n1"]);
        assert!(feed.get(&"n1".into()).unwrap().read);
        assert!(!feed.get(&"n2".into()).unwrap().read);
        assert_eq!(feed.unread_count(), 1);
        assert_eq!(report, PollReport { inserted: 1, updated: 1, unchanged: 0, suppressed: 0 });
        assert_eq!(feed.last_sync(), Some(at(3)));
    }

    #[test]
    fn poll_then_push_is_duplicate_without_alert() {
        let mut feed = FeedState::new();
        feed.apply_poll(vec![note("n1", 1, false)], at(2));
        assert_eq!(feed.apply_push(note("n1", 1, false)), PushEffect::Duplicate);
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn repeated_push_alerts_once() {
        let mut feed = FeedState::new();
        assert_eq!(feed.apply_push(note("n1", 1, false)), PushEffect::Inserted);
        assert_eq!(feed.apply_push(note("n1", 1, false)), PushEffect::Duplicate);
        assert_eq!(feed.unread_count(), 1);
    }

    #[test]
    fn ties_on_timestamp_order_by_id_descending() {
        let mut feed = FeedState::new();
        feed.apply_push(note("a", 5, false));
        feed.apply_push(note("c", 5, false));
        feed.apply_push(note("b", 5, false));
        feed.apply_push(note("z", 1, false));
        feed.apply_push(note("y", 9, false));
        assert_eq!(ids(&feed), vec!["y", "c", "b", "a", "z"]);
    }

    #[test]
    fn poll_window_does_not_evict_older_entries() {
        let mut feed = FeedState::new();
        feed.apply_push(note("old", 0, false));
        feed.apply_poll(vec![note("new", 10, false)], at(11));
        assert_eq!(ids(&feed), vec!["new", "old"]);
        assert_eq!(feed.unread_count(), 2);
    }

    #[test]
    fn arrival_order_does_not_matter() {
        let mut a = FeedState::new();
        a.apply_push(note("n1", 1, false));
        a.apply_poll(vec![note("n1", 1, true), note("n2", 2, false)], at(5));

        let mut b = FeedState::new();
        b.apply_poll(vec![note("n1", 1, true), note("n2", 2, false)], at(5));
        b.apply_push(note("n1", 1, false));

        assert_eq!(a.entries(), b.entries());
        assert_eq!(a.unread_count(), b.unread_count());
    }

    #[test]
    fn mark_all_reports_flipped_ids() {
        let mut feed = FeedState::new();
        feed.apply_poll(vec![note("n1", 1, false), note("n2", 2, true), note("n3", 3, false)], at(4));
        let flipped = feed.mark_all_read();
        assert_eq!(flipped, vec![NotificationId::from("n3"), NotificationId::from("n1")]);
        assert_eq!(feed.unread_count(), 0);
    }

    #[test]
    fn an_id_is_inserted_by_push_at_most_once() {
        let mut feed = FeedState::new();
        let key = NotificationId::from("n1");
        assert_eq!(feed.apply_push(note("n1", 1, false)), PushEffect::Inserted);
        let saved = feed.read_entity(&key);

        feed.remove(&key).unwrap();
        assert_eq!(feed.apply_push(note("n1", 1, false)), PushEffect::Suppressed);

        // A rolled-back delete brings the entry back; a late push is still a repeat.
        feed.write_entity(&key, saved);
        assert_eq!(feed.apply_push(note("n1", 1, false)), PushEffect::Duplicate);
        assert_eq!(feed.len(), 1);
    }

    #[test]
    fn deleted_ids_are_not_resurrected() {
        let mut feed = FeedState::new();
        feed.apply_poll(vec![note("n1", 1, false)], at(2));
        feed.remove(&"n1".into()).unwrap();
        assert_eq!(feed.apply_push(note("n1", 1, false)), PushEffect::Suppressed);
        let report = feed.apply_poll(vec![note("n1", 1, false)], at(3));
        assert_eq!(report.suppressed, 1);
        assert!(feed.is_empty());
    }

    #[test]
    fn missing_entries_report_not_found() {
        let mut feed = FeedState::new();
        assert!(matches!(feed.mark_read(&"nope".into()), Err(SyncError::NotFound(_, _))));
        assert!(feed.remove(&"nope".into()).is_err());
    }

    #[test]
    fn entity_roundtrip_restores_deleted_entry() {
        let mut feed = FeedState::new();
        feed.apply_poll(vec![note("n1", 1, false), note("n2", 2, false)], at(3));
        let before = feed.clone();
        let key = NotificationId::from("n1");
        let saved = feed.read_entity(&key);
        feed.remove(&key).unwrap();
        feed.write_entity(&key, saved);
        assert_eq!(feed, before);
    }

    #[test]
    fn unread_count_tracks_every_operation() {
        let mut feed = FeedState::new();
        let check = |f: &FeedState| {
            assert_eq!(f.unread_count(), f.entries().iter().filter(|n| !n.read).count());
        };
        feed.apply_push(note("n1", 1, false));
        check(&feed);
        feed.apply_poll(vec![note("n2", 2, false), note("n3", 3, true)], at(4));
        check(&feed);
        feed.mark_read(&"n2".into()).unwrap();
        check(&feed);
        feed.remove(&"n1".into()).unwrap();
        check(&feed);
        assert_eq!(feed.unread_count(), 0);
    }
}
