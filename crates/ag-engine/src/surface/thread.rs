use std::sync::Arc;

use ag_core::{
    AlertSink, DiscussionBackend, Post, PostId, PushChannel, PushSubscription, Result, SyncError, ThreadId,
    UserNotice, VoteAction, VoteTransition,
};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{SurfaceKind, ThreadOptions, Worker};
use crate::cell::StateCell;
use crate::counters::CounterDrift;
use crate::optimistic::{Confirmation, MutationCoordinator, MutationOutcome};
use crate::thread_view::ThreadView;

/// An open thread page with its "LIVE" indicator.
///
/// Registers one view on mount, refetches whenever the thread-change push
/// fires (and on a slow fallback timer), and runs votes, answer marking and
/// follow toggles as optimistic mutations.
pub struct ThreadSurface {
    core: Arc<ThreadCore>,
    worker: Option<Worker>,
}

struct ThreadCore {
    thread_id: ThreadId,
    cell: StateCell<ThreadView>,
    backend: Arc<dyn DiscussionBackend>,
    alerts: Arc<dyn AlertSink>,
    votes: MutationCoordinator<PostId>,
    header: MutationCoordinator<ThreadId>,
}

impl ThreadSurface {
    pub async fn mount(
        thread_id: ThreadId,
        backend: Arc<dyn DiscussionBackend>,
        push: &dyn PushChannel,
        alerts: Arc<dyn AlertSink>,
        options: ThreadOptions,
    ) -> Result<Self> {
        let changes = push.subscribe_to_thread_changes(&thread_id);

        let views = match backend.register_view(&thread_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(thread = %thread_id, error = %e, "view registration failed");
                None
            }
        };
        let mut view = ThreadView::from_snapshot(backend.fetch_thread(&thread_id).await?);
        if let Some(count) = views {
            view.register_view(count);
        }
        view.live = true;

        let core = Arc::new(ThreadCore {
            thread_id: thread_id.clone(),
            cell: StateCell::new(view),
            backend,
            alerts,
            votes: MutationCoordinator::new("vote"),
            header: MutationCoordinator::new("thread_header"),
        });
        let worker = Worker::spawn(SurfaceKind::LiveThread, run(Arc::clone(&core), changes, options));
        info!(surface = %SurfaceKind::LiveThread, thread = %thread_id, "surface mounted");
        Ok(Self {
            core,
            worker: Some(worker),
        })
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.core.thread_id
    }

    pub fn view(&self) -> ThreadView {
        self.core.cell.snapshot()
    }

    pub fn post(&self, id: &PostId) -> Option<Post> {
        self.core.cell.read(|v| v.post(id).cloned())
    }

    pub fn is_live(&self) -> bool {
        self.core.cell.read(|v| v.live)
    }

    pub fn changes(&self) -> watch::Receiver<u64> {
        self.core.cell.changes()
    }

    pub async fn refresh(&self) -> Result<Vec<CounterDrift>> {
        self.core.refresh().await
    }

    /// `castVote`. A server answer that disagrees with the local transition
    /// is treated as a conflict: the optimistic value is dropped and the
    /// thread refetched.
    pub async fn cast_vote(&self, post_id: &PostId, action: VoteAction) -> MutationOutcome {
        let backend = Arc::clone(&self.core.backend);
        let outcome = self
            .core
            .votes
            .mutate(
                &self.core.cell,
                post_id.clone(),
                |view| view.apply_vote(post_id, action),
                move |transition: VoteTransition| async move {
                    let reported = backend.cast_vote(&transition.post_id, action).await?;
                    match transition.expected_outcome() {
                        Some(expected) if expected == reported => Ok(Confirmation::Keep),
                        expected => Err(SyncError::Conflict(format!(
                            "expected {expected:?} for post {}, server reported {reported:?}",
                            transition.post_id
                        ))),
                    }
                },
            )
            .await;
        self.core.settle(&outcome, "Could not record your vote").await;
        outcome
    }

    pub async fn mark_answer(&self, post_id: &PostId) -> MutationOutcome {
        let backend = Arc::clone(&self.core.backend);
        let (post, thread) = (post_id.clone(), self.core.thread_id.clone());
        let outcome = self
            .core
            .header
            .mutate(
                &self.core.cell,
                self.core.thread_id.clone(),
                |view| view.mark_answer(post_id),
                move |()| async move {
                    backend.mark_answer(&post, &thread).await?;
                    Ok(Confirmation::Keep)
                },
            )
            .await;
        self.core.settle(&outcome, "Could not mark the answer").await;
        outcome
    }

    pub async fn toggle_follow(&self) -> MutationOutcome {
        let backend = Arc::clone(&self.core.backend);
        let thread = self.core.thread_id.clone();
        let outcome = self
            .core
            .header
            .mutate(
                &self.core.cell,
                self.core.thread_id.clone(),
                |view| {
                    let following = !view.thread.is_following;
                    view.set_following(following);
                    Ok(following)
                },
                move |following| async move {
                    backend.set_following(&thread, following).await?;
                    Ok(Confirmation::Keep)
                },
            )
            .await;
        self.core.settle(&outcome, "Could not update follow status").await;
        outcome
    }

    /// Not optimistic: the post id is minted server-side.
    pub async fn reply(&self, content: &str) -> Result<Post> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SyncError::Validation("reply must not be empty".into()));
        }
        let result = self.core.backend.create_post(&self.core.thread_id, content).await;
        match result {
            Ok(post) => {
                self.core.cell.update(|v| v.record_reply(post.clone()))?;
                Ok(post)
            }
            Err(e) => {
                self.core
                    .settle(&MutationOutcome::failed(e.clone()), "Could not post your reply")
                    .await;
                Err(e)
            }
        }
    }

    pub async fn unmount(mut self) {
        self.core.cell.dispose();
        if let Some(worker) = self.worker.take() {
            worker.stop().await;
        }
        info!(surface = %SurfaceKind::LiveThread, thread = %self.core.thread_id, "surface unmounted");
    }
}

impl Drop for ThreadSurface {
    fn drop(&mut self) {
        self.core.cell.dispose();
    }
}

impl ThreadCore {
    async fn refresh(&self) -> Result<Vec<CounterDrift>> {
        let snapshot = self.backend.fetch_thread(&self.thread_id).await?;
        let drift = self.cell.update(|view| view.reconcile(snapshot))?;
        for d in &drift {
            debug!(post = %d.post_id, local = ?d.local, server = ?d.server, "vote counters corrected");
        }
        Ok(drift)
    }

    async fn settle(&self, outcome: &MutationOutcome, context: &str) {
        let Some(error) = &outcome.error else {
            return;
        };
        if *error == SyncError::Disposed {
            return;
        }
        self.alerts.notice(UserNotice::from_error(context, error));
        if error.requires_refetch() {
            if let Err(e) = self.refresh().await {
                warn!(thread = %self.thread_id, error = %e, "refetch after conflict failed");
            }
        }
    }

    fn set_live(&self, live: bool) {
        let _ = self.cell.update(|view| view.live = live);
    }
}

async fn run(core: Arc<ThreadCore>, mut changes: PushSubscription<ThreadId>, options: ThreadOptions) {
    let period = options.resync_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut live = true;

    loop {
        let refresh = tokio::select! {
            _ = ticker.tick() => true,
            event = changes.recv(), if live => match event {
                Some(_) => {
                    // Coalesce a burst of change events into one refetch.
                    while changes.try_recv().is_some() {}
                    true
                }
                None => {
                    warn!(thread = %core.thread_id, "thread change channel closed");
                    live = false;
                    core.set_live(false);
                    false
                }
            },
        };
        if refresh {
            if let Err(e) = core.refresh().await {
                if e != SyncError::Disposed {
                    warn!(thread = %core.thread_id, error = %e, "thread refresh failed");
                }
            }
        }
    }
}
