#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ag_backend_memory::{MemoryBackend, MemoryStore};
use ag_core::{AlertSink, Notification, NotificationId, ThreadId, UserNotice};
use ag_engine::{FeedOptions, NotificationSurface, SurfaceKind, ThreadOptions, ThreadSurface};

/// Records what a client would have shown as toasts.
#[derive(Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<NotificationId>>,
    notices: Mutex<Vec<UserNotice>>,
}

impl RecordingAlerts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn alerted(&self) -> Vec<NotificationId> {
        self.alerts.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<UserNotice> {
        self.notices.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingAlerts {
    fn alert(&self, notification: &Notification) {
        self.alerts.lock().unwrap().push(notification.id.clone());
    }

    fn notice(&self, notice: UserNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

/// Timers that never fire during a test; pushes and explicit refreshes
/// drive every change.
pub fn manual_feed(kind: SurfaceKind) -> FeedOptions {
    FeedOptions {
        poll_interval: Duration::from_secs(3600),
        ..FeedOptions::for_kind(kind)
    }
}

pub fn session(store: &Arc<MemoryStore>, user: &str) -> Arc<MemoryBackend> {
    Arc::new(store.session(user))
}

pub async fn mount_feed(
    kind: SurfaceKind,
    session: &Arc<MemoryBackend>,
    alerts: &Arc<RecordingAlerts>,
) -> NotificationSurface {
    NotificationSurface::mount(kind, session.clone(), session.as_ref(), alerts.clone(), manual_feed(kind)).await
}

pub async fn mount_thread(
    thread_id: &ThreadId,
    session: &Arc<MemoryBackend>,
    alerts: &Arc<RecordingAlerts>,
) -> ThreadSurface {
    let options = ThreadOptions {
        resync_interval: Duration::from_secs(3600),
    };
    ThreadSurface::mount(thread_id.clone(), session.clone(), session.as_ref(), alerts.clone(), options)
        .await
        .unwrap()
}

/// Lets background workers run until `check` holds, for up to a second.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
