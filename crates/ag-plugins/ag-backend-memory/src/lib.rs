//! # ag-backend-memory Implementation
//!
//! An in-process stand-in for the hosted data store. It implements every
//! port in `ag-core` for one viewer session and behaves like the real
//! backend where the engine depends on it:
//! - vote rows are serialized per post (DashMap shard lock), so counters
//!   never race;
//! - every write publishes a thread-change event and, where the platform
//!   would, a notification for the affected user;
//! - faults can be injected per operation for rollback tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ag_core::{
    DiscussionBackend, Notification, NotificationBackend, NotificationId, NotificationKind, Post, PostId,
    PushChannel, PushSubscription, Result, SyncError, Thread, ThreadId, ThreadSnapshot, UserId, UserVote,
    VoteAction, VoteOutcome,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::one::RefMut;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

enum Subscriber {
    Notifications { owner: UserId, tx: UnboundedSender<Notification> },
    Thread { thread: ThreadId, tx: UnboundedSender<ThreadId> },
}

/// Shared server-side state. Hand out per-user views with [`MemoryStore::session`].
#[derive(Default)]
pub struct MemoryStore {
    threads: DashMap<ThreadId, Thread>,
    /// Stored with `user_vote = None`; the viewer's vote lives in `votes`.
    posts: DashMap<PostId, Post>,
    votes: DashMap<(PostId, UserId), UserVote>,
    follows: DashSet<(ThreadId, UserId)>,
    notifications: DashMap<NotificationId, Notification>,
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber: AtomicU64,
    faults: DashMap<&'static str, SyncError>,
}

/// One viewer's authenticated session against a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryBackend {
    store: Arc<MemoryStore>,
    viewer: UserId,
}

// Time-ordered ids keep the store's natural order close to creation order.
fn new_id() -> String {
    Uuid::now_v7().to_string()
}

fn not_found(kind: &str, id: impl ToString) -> SyncError {
    SyncError::NotFound(kind.to_string(), id.to_string())
}

/// Server-side vote toggle: the new vote and what to report.
fn toggle(current: UserVote, direction: VoteAction) -> (UserVote, VoteOutcome) {
    let requested = direction.as_vote();
    if current == requested {
        (UserVote::None, VoteOutcome::VoteRemoved)
    } else if current == UserVote::None {
        (requested, VoteOutcome::VoteAdded)
    } else {
        (requested, VoteOutcome::VoteChanged)
    }
}

fn adjust(post: &mut Post, vote: UserVote, add: bool) {
    let counter = match vote {
        UserVote::None => return,
        UserVote::Upvote => &mut post.upvote_count,
        UserVote::Downvote => &mut post.downvote_count,
    };
    *counter = if add { counter.saturating_add(1) } else { counter.saturating_sub(1) };
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session(self: &Arc<Self>, viewer: impl Into<UserId>) -> MemoryBackend {
        MemoryBackend {
            store: Arc::clone(self),
            viewer: viewer.into(),
        }
    }

    /// The next call to `operation` (the port method name) fails with `error`.
    pub fn fail_next(&self, operation: &'static str, error: SyncError) {
        self.faults.insert(operation, error);
    }

    fn take_fault(&self, operation: &'static str) -> Result<()> {
        match self.faults.remove(operation) {
            Some((_, error)) => {
                debug!(operation, error = %error, "injected fault");
                Err(error)
            }
            None => Ok(()),
        }
    }

    pub fn create_thread(&self, creator: &UserId, title: &str, description: &str) -> ThreadId {
        let id = ThreadId::from(new_id());
        self.threads.insert(
            id.clone(),
            Thread {
                id: id.clone(),
                creator_id: creator.clone(),
                title: title.to_string(),
                description: description.to_string(),
                created_at: Utc::now(),
                view_count: 0,
                reply_count: 0,
                is_following: false,
                is_solved: false,
            },
        );
        info!(thread = %id, "thread created");
        id
    }

    /// Deletes a thread and cascades to its posts.
    pub fn delete_thread(&self, thread_id: &ThreadId) -> Result<()> {
        self.threads
            .remove(thread_id)
            .ok_or_else(|| not_found("Thread", thread_id))?;
        self.posts.retain(|_, p| &p.thread_id != thread_id);
        self.follows.retain(|(t, _)| t != thread_id);
        self.publish_thread_change(thread_id);
        Ok(())
    }

    /// Soft-deletes a post; the thread's reply count follows.
    pub fn delete_post(&self, post_id: &PostId) -> Result<()> {
        let thread_id = {
            let mut post = self.posts.get_mut(post_id).ok_or_else(|| not_found("Post", post_id))?;
            if post.deleted {
                return Ok(());
            }
            post.deleted = true;
            post.is_marked_answer = false;
            post.thread_id.clone()
        };
        if let Some(mut thread) = self.threads.get_mut(&thread_id) {
            thread.reply_count = thread.reply_count.saturating_sub(1);
        }
        self.refresh_solved(&thread_id);
        self.publish_thread_change(&thread_id);
        Ok(())
    }

    /// Server-side notification creation. Pushed to the owner's live
    /// subscriptions.
    pub fn notify(
        &self,
        owner: &UserId,
        kind: NotificationKind,
        title: &str,
        content: &str,
        action_url: Option<String>,
    ) -> Notification {
        self.notify_at(owner, kind, title, content, action_url, Utc::now())
    }

    pub fn notify_at(
        &self,
        owner: &UserId,
        kind: NotificationKind,
        title: &str,
        content: &str,
        action_url: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Notification {
        let notification = Notification {
            id: NotificationId::from(new_id()),
            user_id: owner.clone(),
            kind,
            title: title.to_string(),
            content: content.to_string(),
            action_url,
            read: false,
            created_at,
        };
        self.notifications
            .insert(notification.id.clone(), notification.clone());
        self.publish_notification(&notification);
        notification
    }

    /// Marks read as if from another device of the owner. No push.
    pub fn mark_read_elsewhere(&self, id: &NotificationId) {
        if let Some(mut n) = self.notifications.get_mut(id) {
            n.read = true;
        }
    }

    /// Votes as if from another device of `viewer`. No push.
    pub fn vote_elsewhere(&self, post_id: &PostId, viewer: &UserId, direction: VoteAction) -> Result<VoteOutcome> {
        self.apply_vote(post_id, viewer, direction).map(|(_, outcome)| outcome)
    }

    fn apply_vote(&self, post_id: &PostId, viewer: &UserId, direction: VoteAction) -> Result<(ThreadId, VoteOutcome)> {
        // Holding the post row serializes concurrent voters on it.
        let mut post = self
            .posts
            .get_mut(post_id)
            .filter(|p| !p.deleted)
            .ok_or_else(|| not_found("Post", post_id))?;
        let key = (post_id.clone(), viewer.clone());
        let current = self.votes.get(&key).map(|v| *v).unwrap_or_default();
        let (next, outcome) = toggle(current, direction);

        adjust(&mut post, current, false);
        adjust(&mut post, next, true);
        if next == UserVote::None {
            self.votes.remove(&key);
        } else {
            self.votes.insert(key, next);
        }
        debug!(post = %post_id, %viewer, ?outcome, "vote cast");
        Ok((post.thread_id.clone(), outcome))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn thread(&self, id: &ThreadId) -> Option<Thread> {
        self.threads.get(id).map(|t| t.clone())
    }

    pub fn post(&self, id: &PostId) -> Option<Post> {
        self.posts.get(id).map(|p| p.clone())
    }

    fn subscribe(&self, subscriber: Subscriber) -> u64 {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, subscriber);
        id
    }

    fn publish_notification(&self, notification: &Notification) {
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if let Subscriber::Notifications { owner, tx } = entry.value() {
                if owner == &notification.user_id && tx.send(notification.clone()).is_err() {
                    closed.push(*entry.key());
                }
            }
        }
        self.prune(closed);
    }

    fn publish_thread_change(&self, thread_id: &ThreadId) {
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if let Subscriber::Thread { thread, tx } = entry.value() {
                if thread == thread_id && tx.send(thread_id.clone()).is_err() {
                    closed.push(*entry.key());
                }
            }
        }
        self.prune(closed);
    }

    // Removal happens after iteration; removing while iterating would
    // deadlock on the shard lock.
    fn prune(&self, closed: Vec<u64>) {
        for id in closed {
            self.subscribers.remove(&id);
        }
    }

    fn refresh_solved(&self, thread_id: &ThreadId) {
        let answers = self
            .posts
            .iter()
            .filter(|p| &p.thread_id == thread_id && !p.deleted && p.is_marked_answer)
            .count();
        if let Some(mut thread) = self.threads.get_mut(thread_id) {
            thread.is_solved = answers == 1;
        }
    }
}

impl MemoryBackend {
    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn owned_notification(&self, id: &NotificationId) -> Result<RefMut<'_, NotificationId, Notification>> {
        match self.store.notifications.get_mut(id) {
            Some(n) if n.user_id == self.viewer => Ok(n),
            _ => Err(not_found("Notification", id)),
        }
    }

    fn own_notifications(&self) -> Vec<Notification> {
        let mut own: Vec<Notification> = self
            .store
            .notifications
            .iter()
            .filter(|n| n.user_id == self.viewer)
            .map(|n| n.clone())
            .collect();
        own.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        own
    }
}

#[async_trait]
impl DiscussionBackend for MemoryBackend {
    /// Assembles the viewer-scoped header and posts, oldest post first.
    async fn fetch_thread(&self, thread_id: &ThreadId) -> Result<ThreadSnapshot> {
        self.store.take_fault("fetch_thread")?;
        let mut thread = self
            .store
            .thread(thread_id)
            .ok_or_else(|| not_found("Thread", thread_id))?;
        thread.is_following = self
            .store
            .follows
            .contains(&(thread_id.clone(), self.viewer.clone()));

        let mut posts: Vec<Post> = self
            .store
            .posts
            .iter()
            .filter(|p| &p.thread_id == thread_id)
            .map(|p| p.clone())
            .collect();
        posts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        for post in &mut posts {
            post.user_vote = self
                .store
                .votes
                .get(&(post.id.clone(), self.viewer.clone()))
                .map(|v| *v)
                .unwrap_or_default();
        }
        Ok(ThreadSnapshot { thread, posts })
    }

    async fn cast_vote(&self, post_id: &PostId, direction: VoteAction) -> Result<VoteOutcome> {
        self.store.take_fault("cast_vote")?;
        let (thread_id, outcome) = self.store.apply_vote(post_id, &self.viewer, direction)?;
        self.store.publish_thread_change(&thread_id);
        Ok(outcome)
    }

    async fn mark_answer(&self, post_id: &PostId, thread_id: &ThreadId) -> Result<()> {
        self.store.take_fault("mark_answer")?;
        let thread = self
            .store
            .thread(thread_id)
            .ok_or_else(|| not_found("Thread", thread_id))?;
        if thread.creator_id != self.viewer {
            return Err(SyncError::Validation("only the thread creator can mark an answer".into()));
        }
        let author = match self.store.post(post_id) {
            Some(p) if &p.thread_id == thread_id && !p.deleted => p.author_id,
            _ => return Err(not_found("Post", post_id)),
        };

        for mut post in self.store.posts.iter_mut() {
            if &post.thread_id == thread_id {
                post.is_marked_answer = &post.id == post_id;
            }
        }
        self.store.refresh_solved(thread_id);
        self.store.publish_thread_change(thread_id);

        if author != self.viewer {
            self.store.notify(
                &author,
                NotificationKind::AnswerAccepted,
                "Your answer was accepted",
                &thread.title,
                Some(format!("/forum/threads/{thread_id}")),
            );
        }
        Ok(())
    }

    async fn register_view(&self, thread_id: &ThreadId) -> Result<u64> {
        self.store.take_fault("register_view")?;
        let mut thread = self
            .store
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| not_found("Thread", thread_id))?;
        thread.view_count += 1;
        Ok(thread.view_count)
    }

    async fn set_following(&self, thread_id: &ThreadId, following: bool) -> Result<()> {
        self.store.take_fault("set_following")?;
        if self.store.thread(thread_id).is_none() {
            return Err(not_found("Thread", thread_id));
        }
        let key = (thread_id.clone(), self.viewer.clone());
        if following {
            self.store.follows.insert(key);
        } else {
            self.store.follows.remove(&key);
        }
        Ok(())
    }

    /// Inserts the reply, bumps the reply count, and notifies the thread
    /// creator and followers other than the author.
    async fn create_post(&self, thread_id: &ThreadId, content: &str) -> Result<Post> {
        self.store.take_fault("create_post")?;
        let title = {
            let mut thread = self
                .store
                .threads
                .get_mut(thread_id)
                .ok_or_else(|| not_found("Thread", thread_id))?;
            thread.reply_count += 1;
            thread.title.clone()
        };
        let post = Post {
            id: PostId::from(new_id()),
            thread_id: thread_id.clone(),
            author_id: self.viewer.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            upvote_count: 0,
            downvote_count: 0,
            is_marked_answer: false,
            user_vote: UserVote::None,
            deleted: false,
        };
        self.store.posts.insert(post.id.clone(), post.clone());
        self.store.publish_thread_change(thread_id);

        let mut recipients: Vec<UserId> = self
            .store
            .follows
            .iter()
            .filter(|k| &k.0 == thread_id)
            .map(|k| k.1.clone())
            .collect();
        if let Some(creator) = self.store.thread(thread_id).map(|t| t.creator_id) {
            recipients.push(creator);
        }
        recipients.sort();
        recipients.dedup();
        for user in recipients.iter().filter(|u| *u != &self.viewer) {
            self.store.notify(
                user,
                NotificationKind::ForumReply,
                "New reply",
                &title,
                Some(format!("/forum/threads/{thread_id}")),
            );
        }
        Ok(post)
    }
}

#[async_trait]
impl NotificationBackend for MemoryBackend {
    async fn fetch_notifications(&self, unread_only: bool, limit: usize) -> Result<Vec<Notification>> {
        self.store.take_fault("fetch_notifications")?;
        Ok(self
            .own_notifications()
            .into_iter()
            .filter(|n| !unread_only || !n.read)
            .take(limit)
            .collect())
    }

    async fn fetch_unread_count(&self) -> Result<u32> {
        self.store.take_fault("fetch_unread_count")?;
        Ok(self.own_notifications().iter().filter(|n| !n.read).count() as u32)
    }

    async fn mark_notification_read(&self, id: &NotificationId) -> Result<()> {
        self.store.take_fault("mark_notification_read")?;
        self.owned_notification(id)?.read = true;
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<()> {
        self.store.take_fault("mark_all_notifications_read")?;
        for mut n in self.store.notifications.iter_mut() {
            if n.user_id == self.viewer {
                n.read = true;
            }
        }
        Ok(())
    }

    async fn delete_notification(&self, id: &NotificationId) -> Result<()> {
        self.store.take_fault("delete_notification")?;
        drop(self.owned_notification(id)?);
        self.store.notifications.remove(id);
        Ok(())
    }
}

impl PushChannel for MemoryBackend {
    fn subscribe_to_own_notifications(&self) -> PushSubscription<Notification> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let id = self.store.subscribe(Subscriber::Notifications {
            owner: self.viewer.clone(),
            tx,
        });
        let store = Arc::clone(&self.store);
        PushSubscription::new(rx, move || {
            store.subscribers.remove(&id);
        })
    }

    fn subscribe_to_thread_changes(&self, thread_id: &ThreadId) -> PushSubscription<ThreadId> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let id = self.store.subscribe(Subscriber::Thread {
            thread: thread_id.clone(),
            tx,
        });
        let store = Arc::clone(&self.store);
        PushSubscription::new(rx, move || {
            store.subscribers.remove(&id);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Arc<MemoryStore>, ThreadId) {
        let store = MemoryStore::new();
        let thread = store.create_thread(&UserId::from("tutor"), "Chain rule", "Why does it work?");
        (store, thread)
    }

    #[tokio::test]
    async fn vote_elsewhere_counts_without_a_push() {
        let (store, thread) = seeded();
        let viewer = store.session("viewer");
        let post = store.session("tutor").create_post(&thread, "Apply it twice.").await.unwrap();
        let mut changes = viewer.subscribe_to_thread_changes(&thread);

        let outcome = store.vote_elsewhere(&post.id, viewer.viewer(), VoteAction::Upvote).unwrap();
        assert_eq!(outcome, VoteOutcome::VoteAdded);
        assert!(changes.try_recv().is_none());
        assert_eq!(store.post(&post.id).unwrap().upvote_count, 1);

        // The viewer's own session sees the vote and toggles it off.
        assert_eq!(viewer.cast_vote(&post.id, VoteAction::Upvote).await.unwrap(), VoteOutcome::VoteRemoved);
        assert_eq!(changes.try_recv(), Some(thread.clone()));
    }

    #[tokio::test]
    async fn votes_toggle_per_viewer() {
        let (store, thread) = seeded();
        let alice = store.session("alice");
        let bob = store.session("bob");
        let post = alice.create_post(&thread, "d/dx f(g(x))").await.unwrap();

        assert_eq!(alice.cast_vote(&post.id, VoteAction::Upvote).await.unwrap(), VoteOutcome::VoteAdded);
        assert_eq!(bob.cast_vote(&post.id, VoteAction::Downvote).await.unwrap(), VoteOutcome::VoteAdded);
        assert_eq!(alice.cast_vote(&post.id, VoteAction::Downvote).await.unwrap(), VoteOutcome::VoteChanged);
        assert_eq!(bob.cast_vote(&post.id, VoteAction::Downvote).await.unwrap(), VoteOutcome::VoteRemoved);

        let stored = store.post(&post.id).unwrap();
        assert_eq!((stored.upvote_count, stored.downvote_count), (0, 1));

        let snapshot = alice.fetch_thread(&thread).await.unwrap();
        assert_eq!(snapshot.posts[0].user_vote, UserVote::Downvote);
        let snapshot = bob.fetch_thread(&thread).await.unwrap();
        assert_eq!(snapshot.posts[0].user_vote, UserVote::None);
    }

    #[tokio::test]
    async fn reply_notifies_creator_and_publishes_change() {
        let (store, thread) = seeded();
        let tutor = store.session("tutor");
        let mut inbox = tutor.subscribe_to_own_notifications();
        let mut changes = tutor.subscribe_to_thread_changes(&thread);

        store.session("student").create_post(&thread, "Think of it as composition").await.unwrap();

        let pushed = inbox.recv().await.unwrap();
        assert_eq!(pushed.kind, NotificationKind::ForumReply);
        assert_eq!(changes.recv().await, Some(thread.clone()));
        assert_eq!(store.thread(&thread).unwrap().reply_count, 1);
        assert_eq!(tutor.fetch_unread_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_answer_is_exclusive_and_creator_only() {
        let (store, thread) = seeded();
        let tutor = store.session("tutor");
        let student = store.session("student");
        let first = student.create_post(&thread, "first").await.unwrap();
        let second = student.create_post(&thread, "second").await.unwrap();

        let err = student.mark_answer(&first.id, &thread).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        tutor.mark_answer(&first.id, &thread).await.unwrap();
        tutor.mark_answer(&second.id, &thread).await.unwrap();
        let snapshot = tutor.fetch_thread(&thread).await.unwrap();
        let answers: Vec<_> = snapshot.posts.iter().filter(|p| p.is_marked_answer).map(|p| p.id.clone()).collect();
        assert_eq!(answers, vec![second.id.clone()]);
        assert!(snapshot.thread.is_solved);
    }

    #[tokio::test]
    async fn notifications_are_scoped_and_ordered() {
        let store = MemoryStore::new();
        let alice = UserId::from("alice");
        let base = Utc::now();
        store.notify_at(&alice, NotificationKind::System, "old", "", None, base - chrono::Duration::minutes(5));
        let newest = store.notify_at(&alice, NotificationKind::Message, "new", "", None, base);
        store.notify(&UserId::from("bob"), NotificationKind::System, "not yours", "", None);

        let session = store.session("alice");
        let feed = session.fetch_notifications(false, 10).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].id, newest.id);

        session.mark_notification_read(&newest.id).await.unwrap();
        assert_eq!(session.fetch_notifications(true, 10).await.unwrap().len(), 1);

        let bobs = store.session("bob").fetch_notifications(false, 10).await.unwrap();
        let err = session.delete_notification(&bobs[0].id).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_, _)));
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let (store, thread) = seeded();
        let session = store.session("alice");
        store.fail_next("fetch_thread", SyncError::Network("offline".into()));
        assert!(session.fetch_thread(&thread).await.is_err());
        assert!(session.fetch_thread(&thread).await.is_ok());
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let (store, thread) = seeded();
        let session = store.session("alice");
        let a = session.subscribe_to_own_notifications();
        let b = session.subscribe_to_thread_changes(&thread);
        assert_eq!(store.subscriber_count(), 2);
        drop(a);
        b.unsubscribe();
        assert_eq!(store.subscriber_count(), 0);
    }
}
