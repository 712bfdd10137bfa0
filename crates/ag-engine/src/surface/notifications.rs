use std::sync::Arc;

use ag_core::{
    AlertSink, Notification, NotificationBackend, NotificationId, PushChannel, PushSubscription, Result,
    SyncError, UserNotice,
};
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{FeedOptions, SurfaceKind, Worker};
use crate::cell::StateCell;
use crate::feed::{FeedState, PollReport, PushEffect};
use crate::optimistic::{Confirmation, MutationCoordinator, MutationOutcome};

/// A mounted notification surface (bell dropdown or full page).
///
/// Mounting subscribes to the viewer's push stream, runs one poll, then
/// hands both producers to a background task. Unmounting (or dropping)
/// disposes the replica, aborts the task and releases the subscription.
pub struct NotificationSurface {
    core: Arc<FeedCore>,
    worker: Option<Worker>,
}

struct FeedCore {
    kind: SurfaceKind,
    cell: StateCell<FeedState>,
    backend: Arc<dyn NotificationBackend>,
    alerts: Arc<dyn AlertSink>,
    options: FeedOptions,
    entries: MutationCoordinator<NotificationId>,
}

impl NotificationSurface {
    pub async fn mount(
        kind: SurfaceKind,
        backend: Arc<dyn NotificationBackend>,
        push: &dyn PushChannel,
        alerts: Arc<dyn AlertSink>,
        options: FeedOptions,
    ) -> Self {
        let core = Arc::new(FeedCore {
            kind,
            cell: StateCell::new(FeedState::new()),
            backend,
            alerts,
            options,
            entries: MutationCoordinator::new("notification"),
        });

        // Subscribe before the first poll so nothing lands in the gap.
        let subscription = push.subscribe_to_own_notifications();
        if let Err(e) = core.poll_once().await {
            core.poll_failed(&e);
        }

        let worker = Worker::spawn(kind, run(Arc::clone(&core), subscription));
        info!(surface = %kind, interval = ?core.options.poll_interval, "surface mounted");
        Self {
            core,
            worker: Some(worker),
        }
    }

    pub fn kind(&self) -> SurfaceKind {
        self.core.kind
    }

    pub fn feed(&self) -> FeedState {
        self.core.cell.snapshot()
    }

    pub fn entries(&self) -> Vec<Notification> {
        self.core.cell.read(|f| f.entries().to_vec())
    }

    pub fn unread_count(&self) -> usize {
        self.core.cell.read(FeedState::unread_count)
    }

    /// Bumps on every replica change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.core.cell.changes()
    }

    pub fn is_mounted(&self) -> bool {
        !self.core.cell.is_disposed()
    }

    /// Out-of-band poll (pull to refresh).
    pub async fn refresh(&self) -> Result<PollReport> {
        self.core.poll_once().await
    }

    /// Compares the server's unread count with the local projection and
    /// resyncs on mismatch. Returns whether a resync ran.
    pub async fn check_drift(&self) -> Result<bool> {
        self.core.check_drift().await
    }

    pub async fn mark_read(&self, id: &NotificationId) -> MutationOutcome {
        let backend = Arc::clone(&self.core.backend);
        let key = id.clone();
        let outcome = self
            .core
            .entries
            .mutate(
                &self.core.cell,
                id.clone(),
                |feed| {
                    let was_unread = feed.get(id).is_some_and(|n| !n.read);
                    feed.mark_read(id).map(|()| was_unread)
                },
                move |was_unread| async move {
                    if was_unread {
                        backend.mark_notification_read(&key).await?;
                    }
                    Ok(Confirmation::Keep)
                },
            )
            .await;
        self.core.report(&outcome, "Could not mark notification as read");
        outcome
    }

    pub async fn delete(&self, id: &NotificationId) -> MutationOutcome {
        let backend = Arc::clone(&self.core.backend);
        let key = id.clone();
        let outcome = self
            .core
            .entries
            .mutate(
                &self.core.cell,
                id.clone(),
                |feed| feed.remove(id).map(drop),
                move |()| async move {
                    backend.delete_notification(&key).await?;
                    Ok(Confirmation::Keep)
                },
            )
            .await;
        self.core.report(&outcome, "Could not delete notification");
        outcome
    }

    /// The remote call reports no per-item result, so a failure is not rolled
    /// back entry by entry: the surface refetches and the server's `read`
    /// flags win. The unread fetch returns every entry still unread, including
    /// ones older than the recent window.
    pub async fn mark_all_read(&self) -> MutationOutcome {
        let core = &self.core;
        let flipped = match core.cell.update(FeedState::mark_all_read) {
            Ok(flipped) => flipped,
            Err(e) => return MutationOutcome::failed(e),
        };

        let result = core.backend.mark_all_notifications_read().await;
        if core.cell.is_disposed() {
            return MutationOutcome::failed(SyncError::Disposed);
        }

        let outcome = match result {
            Ok(()) => MutationOutcome::ok(),
            Err(e) => {
                warn!(surface = %core.kind, flipped = flipped.len(), error = %e, "mark-all failed, resyncing");
                if let Err(resync) = core.poll_once().await {
                    core.poll_failed(&resync);
                }
                MutationOutcome::failed(e)
            }
        };
        core.report(&outcome, "Could not mark all notifications as read");
        outcome
    }

    pub async fn unmount(mut self) {
        self.core.cell.dispose();
        if let Some(worker) = self.worker.take() {
            worker.stop().await;
        }
        info!(surface = %self.core.kind, "surface unmounted");
    }
}

impl Drop for NotificationSurface {
    fn drop(&mut self) {
        self.core.cell.dispose();
    }
}

impl FeedCore {
    async fn poll_once(&self) -> Result<PollReport> {
        let unread = self
            .backend
            .fetch_notifications(true, self.options.unread_limit)
            .await?;
        let recent = self
            .backend
            .fetch_notifications(false, self.options.recent_limit)
            .await?;

        // Recent is applied last: it is the later read of the `read` flags.
        let now = Utc::now();
        let report = self.cell.update(|feed| {
            let mut report = feed.apply_poll(unread, now);
            report.merge(feed.apply_poll(recent, now));
            report
        })?;
        if report.changed() {
            debug!(surface = %self.kind, ?report, "poll applied");
        }
        Ok(report)
    }

    async fn check_drift(&self) -> Result<bool> {
        let server = self.backend.fetch_unread_count().await? as usize;
        let local = self.cell.read(FeedState::unread_count);
        // The unread window may legitimately hold fewer than the server has.
        if server == local || (server > local && local >= self.options.unread_limit) {
            return Ok(false);
        }
        warn!(surface = %self.kind, server, local, "unread count drift, resyncing");
        self.poll_once().await?;
        Ok(true)
    }

    async fn tick(&self) {
        if let Err(e) = self.poll_once().await {
            self.poll_failed(&e);
            return;
        }
        if self.options.verify_unread_count {
            if let Err(e) = self.check_drift().await {
                self.poll_failed(&e);
            }
        }
    }

    fn on_push(&self, notification: Notification) {
        let alert_copy = notification.clone();
        match self.cell.update(|feed| feed.apply_push(notification)) {
            Ok(PushEffect::Inserted) => {
                debug!(surface = %self.kind, id = %alert_copy.id, "push inserted");
                self.alerts.alert(&alert_copy);
            }
            Ok(effect) => debug!(surface = %self.kind, id = %alert_copy.id, ?effect, "push ignored"),
            Err(_) => {}
        }
    }

    fn poll_failed(&self, error: &SyncError) {
        match error {
            SyncError::Disposed => {}
            SyncError::Unauthorized(_) => self.alerts.notice(UserNotice::from_error("Sync", error)),
            _ => warn!(surface = %self.kind, error = %error, "poll failed, will retry next tick"),
        }
    }

    fn report(&self, outcome: &MutationOutcome, context: &str) {
        match &outcome.error {
            None | Some(SyncError::Disposed) => {}
            Some(e) => self.alerts.notice(UserNotice::from_error(context, e)),
        }
    }
}

async fn run(core: Arc<FeedCore>, mut push: PushSubscription<Notification>) {
    let period = core.options.poll_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut push_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => core.tick().await,
            event = push.recv(), if push_open => match event {
                Some(notification) => core.on_push(notification),
                None => {
                    warn!(surface = %core.kind, "push channel closed, polling only");
                    push_open = false;
                }
            },
        }
    }
}
