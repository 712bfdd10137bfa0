//! Independently mounted consumers of the same server-side data.
//!
//! Every surface owns its replica, its poll timer and its push
//! subscription. Nothing is shared between surfaces: two of them may
//! disagree until their next tick, and neither is authoritative for the
//! other. Worst-case convergence is the slower surface's poll interval.

mod notifications;
mod thread;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

pub use notifications::NotificationSurface;
pub use thread::ThreadSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Summary dropdown in the navigation bar.
    Bell,
    /// Full notifications page.
    NotificationPage,
    /// "LIVE" badge and post list of an open thread.
    LiveThread,
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SurfaceKind::Bell => "bell",
            SurfaceKind::NotificationPage => "notification_page",
            SurfaceKind::LiveThread => "live_thread",
        })
    }
}

/// Poll cadence and window sizes for a notification surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedOptions {
    pub poll_interval: Duration,
    /// Top-N most recent notifications fetched per tick.
    pub recent_limit: usize,
    /// Upper bound on the unread set fetched per tick.
    pub unread_limit: usize,
    /// Compare the server unread count with the local one after each tick.
    pub verify_unread_count: bool,
}

impl FeedOptions {
    pub fn bell() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            recent_limit: 10,
            unread_limit: 50,
            verify_unread_count: true,
        }
    }

    pub fn page() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            recent_limit: 50,
            unread_limit: 100,
            verify_unread_count: false,
        }
    }

    pub fn for_kind(kind: SurfaceKind) -> Self {
        match kind {
            SurfaceKind::Bell => Self::bell(),
            SurfaceKind::NotificationPage | SurfaceKind::LiveThread => Self::page(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOptions {
    /// Fallback refetch cadence while the push channel is quiet.
    pub resync_interval: Duration,
}

impl Default for ThreadOptions {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(15),
        }
    }
}

/// The background task of a mounted surface. Aborted on `stop` and on drop,
/// which also drops the push subscription it owns.
struct Worker {
    kind: SurfaceKind,
    task: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn<F>(kind: SurfaceKind, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            kind,
            task: Some(tokio::spawn(fut)),
        }
    }

    async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!(surface = %self.kind, "worker stopped");
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
