//! # Agora Binary
//!
//! Assembles the sync engine against the backend selected at compile time
//! and walks one viewer through a short session: three mounted surfaces,
//! a few votes, a reply from another user, and the feeds converging.

mod alerts;

use std::sync::Arc;
use std::time::Duration;

use ag_config::Settings;
use ag_core::{DiscussionBackend, NotificationBackend, NotificationKind, UserId, VoteAction};
use ag_engine::{FeedOptions, NotificationSurface, SurfaceKind, ThreadOptions, ThreadSurface};
use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "memory-backend")]
use ag_backend_memory::MemoryStore;

#[cfg(not(feature = "memory-backend"))]
compile_error!("agora needs a backend; enable the `memory-backend` feature");

use crate::alerts::LogAlerts;

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn feed_options(settings: &Settings, kind: SurfaceKind) -> FeedOptions {
    let feed = &settings.feed;
    match kind {
        SurfaceKind::Bell => FeedOptions {
            poll_interval: settings.poll.bell_interval(),
            recent_limit: feed.bell_recent_limit,
            unread_limit: feed.unread_limit,
            verify_unread_count: feed.verify_bell_unread_count,
        },
        _ => FeedOptions {
            poll_interval: settings.poll.page_interval(),
            recent_limit: feed.page_recent_limit,
            unread_limit: feed.unread_limit,
            verify_unread_count: false,
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings);

    // 1. Initialize the backend and seed a thread
    let store = MemoryStore::new();
    let tutor = UserId::from("tutor");
    let thread_id = store.create_thread(&tutor, "Limits at infinity", "Why does 1/x go to zero?");
    store.notify(
        &tutor,
        NotificationKind::System,
        "Welcome back",
        "You have a new forum thread",
        None,
    );

    let session = Arc::new(store.session(tutor.clone()));
    let student = store.session("student");
    let answer = student
        .create_post(&thread_id, "Compare 1/x with 1/n.")
        .await
        .context("seeding a reply")?;

    // 2. Mount surfaces (each owns its own replica, timer and subscription)
    let alerts = Arc::new(LogAlerts);
    let bell = NotificationSurface::mount(
        SurfaceKind::Bell,
        session.clone(),
        session.as_ref(),
        alerts.clone(),
        feed_options(&settings, SurfaceKind::Bell),
    )
    .await;
    let page = NotificationSurface::mount(
        SurfaceKind::NotificationPage,
        session.clone(),
        session.as_ref(),
        alerts.clone(),
        feed_options(&settings, SurfaceKind::NotificationPage),
    )
    .await;
    let live = ThreadSurface::mount(
        thread_id.clone(),
        session.clone(),
        session.as_ref(),
        alerts.clone(),
        ThreadOptions {
            resync_interval: settings.poll.thread_resync(),
        },
    )
    .await
    .context("opening thread")?;

    info!(bell = bell.unread_count(), page = page.unread_count(), "🚀 agora session started");

    // 3. Drive a few interactions
    for action in [VoteAction::Upvote, VoteAction::Downvote, VoteAction::Downvote] {
        let outcome = live.cast_vote(&answer.id, action).await;
        let post = live.post(&answer.id);
        info!(
            ?action,
            success = outcome.success,
            up = post.as_ref().map(|p| p.upvote_count),
            down = post.as_ref().map(|p| p.downvote_count),
            "vote"
        );
    }
    live.mark_answer(&answer.id).await;
    live.toggle_follow().await;

    student
        .create_post(&thread_id, "Thanks, that helped!")
        .await
        .context("second reply")?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let first_unread = page.entries().into_iter().find(|n| !n.read);
    if let Some(n) = first_unread {
        page.mark_read(&n.id).await;
    }
    info!(
        bell = bell.unread_count(),
        page = page.unread_count(),
        server = session.fetch_unread_count().await.unwrap_or_default(),
        "feeds before convergence"
    );

    bell.refresh().await.context("bell refresh")?;
    let view = live.view();
    info!(
        bell = bell.unread_count(),
        page = page.unread_count(),
        replies = view.thread.reply_count,
        views = view.thread.view_count,
        solved = view.thread.is_solved,
        "feeds converged"
    );

    // 4. Tear down
    bell.unmount().await;
    page.unmount().await;
    live.unmount().await;
    info!(subscribers = store.subscriber_count(), "session closed");
    Ok(())
}
