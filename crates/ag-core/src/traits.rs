//! # Core Traits (Ports)
//!
//! Any backend plugin must implement these traits to be used by the engine.
//! The viewer's identity is carried by the backend session; none of the
//! calls take a user id.

use async_trait::async_trait;

use crate::error::{Result, SyncError};
use crate::models::{
    Notification, NotificationId, Post, PostId, ThreadId, ThreadSnapshot, VoteAction, VoteOutcome,
};
use crate::push::PushSubscription;

/// Thread, post and vote operations against the external data store.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DiscussionBackend: Send + Sync {
    async fn fetch_thread(&self, thread_id: &ThreadId) -> Result<ThreadSnapshot>;

    /// Applies the toggle server-side and reports what happened.
    async fn cast_vote(&self, post_id: &PostId, direction: VoteAction) -> Result<VoteOutcome>;

    async fn mark_answer(&self, post_id: &PostId, thread_id: &ThreadId) -> Result<()>;

    /// Records one view and returns the new server-side view count.
    async fn register_view(&self, thread_id: &ThreadId) -> Result<u64>;

    async fn set_following(&self, thread_id: &ThreadId, following: bool) -> Result<()>;

    async fn create_post(&self, thread_id: &ThreadId, content: &str) -> Result<Post>;
}

/// Notification reads and writes, scoped to the viewer.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait NotificationBackend: Send + Sync {
    /// Newest first, at most `limit` records.
    async fn fetch_notifications(&self, unread_only: bool, limit: usize) -> Result<Vec<Notification>>;

    async fn fetch_unread_count(&self) -> Result<u32>;

    async fn mark_notification_read(&self, id: &NotificationId) -> Result<()>;

    /// Does not report per-item outcomes; a failure may be partial.
    async fn mark_all_notifications_read(&self) -> Result<()>;

    async fn delete_notification(&self, id: &NotificationId) -> Result<()>;
}

/// The opaque real-time channel.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait PushChannel: Send + Sync {
    /// Insert events for notifications owned by the viewer.
    fn subscribe_to_own_notifications(&self) -> PushSubscription<Notification>;

    /// Fires whenever anything inside the thread changes.
    fn subscribe_to_thread_changes(&self, thread_id: &ThreadId) -> PushSubscription<ThreadId>;
}

/// Non-blocking user-facing message (toast or inline banner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNotice {
    pub message: String,
    /// Set for authorization failures: the session is gone.
    pub relogin_required: bool,
}

impl UserNotice {
    pub fn from_error(context: &str, error: &SyncError) -> Self {
        match error {
            SyncError::Unauthorized(_) => Self {
                message: "Your session has expired, please log in again.".to_string(),
                relogin_required: true,
            },
            other => Self {
                message: format!("{context}: {other}"),
                relogin_required: false,
            },
        }
    }
}

/// Toast/sound sink owned by the host UI.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait AlertSink: Send + Sync {
    /// One-shot alert for a newly arrived notification.
    fn alert(&self, notification: &Notification);

    fn notice(&self, notice: UserNotice);
}
