mod common;

use ag_backend_memory::MemoryStore;
use ag_core::{DiscussionBackend, SyncError, UserId, UserVote, VoteAction};
use ag_engine::VoteTally;

use common::{eventually, mount_thread, session, RecordingAlerts};

#[tokio::test]
async fn upvote_then_downvote_against_existing_votes() {
    let store = MemoryStore::new();
    let thread = store.create_thread(&UserId::from("tutor"), "Integration by parts", "");
    let post = store
        .session("tutor")
        .create_post(&thread, "Pick u so that du is simpler.")
        .await
        .unwrap();
    for voter in ["a", "b", "c", "d", "e"] {
        store.session(voter).cast_vote(&post.id, VoteAction::Upvote).await.unwrap();
    }
    for voter in ["f", "g"] {
        store.session(voter).cast_vote(&post.id, VoteAction::Downvote).await.unwrap();
    }

    let viewer = session(&store, "viewer");
    let alerts = RecordingAlerts::new();
    let live = mount_thread(&thread, &viewer, &alerts).await;
    let tally = |live: &ag_engine::ThreadSurface| live.post(&post.id).map(|p| VoteTally::of(&p));
    assert_eq!(tally(&live), Some(VoteTally::new(UserVote::None, 5, 2)));

    assert!(live.cast_vote(&post.id, VoteAction::Upvote).await.success);
    assert_eq!(tally(&live), Some(VoteTally::new(UserVote::Upvote, 6, 2)));

    assert!(live.cast_vote(&post.id, VoteAction::Downvote).await.success);
    assert_eq!(tally(&live), Some(VoteTally::new(UserVote::Downvote, 5, 3)));

    let server = store.post(&post.id).unwrap();
    assert_eq!((server.upvote_count, server.downvote_count), (5, 3));
    assert!(alerts.notices().is_empty());
    live.unmount().await;
}

#[tokio::test]
async fn failed_vote_rolls_back() {
    let store = MemoryStore::new();
    let thread = store.create_thread(&UserId::from("tutor"), "Eigenvalues", "");
    let post = store.session("tutor").create_post(&thread, "Start from det(A - λI) = 0").await.unwrap();

    let viewer = session(&store, "viewer");
    let alerts = RecordingAlerts::new();
    let live = mount_thread(&thread, &viewer, &alerts).await;

    store.fail_next("cast_vote", SyncError::Network("connection reset".into()));
    let outcome = live.cast_vote(&post.id, VoteAction::Upvote).await;

    assert!(!outcome.success);
    assert_eq!(outcome.error, Some(SyncError::Network("connection reset".into())));
    let local = live.post(&post.id).unwrap();
    assert_eq!(VoteTally::of(&local), VoteTally::new(UserVote::None, 0, 0));
    assert_eq!(alerts.notices().len(), 1);
    assert!(!alerts.notices()[0].relogin_required);
    live.unmount().await;
}

#[tokio::test]
async fn expired_session_asks_for_login() {
    let store = MemoryStore::new();
    let thread = store.create_thread(&UserId::from("tutor"), "Vectors", "");
    let post = store.session("tutor").create_post(&thread, "Use the dot product.").await.unwrap();

    let viewer = session(&store, "viewer");
    let alerts = RecordingAlerts::new();
    let live = mount_thread(&thread, &viewer, &alerts).await;

    store.fail_next("cast_vote", SyncError::Unauthorized("token expired".into()));
    assert!(!live.cast_vote(&post.id, VoteAction::Downvote).await.success);
    assert_eq!(live.post(&post.id).unwrap().user_vote, UserVote::None);
    assert!(alerts.notices()[0].relogin_required);
    live.unmount().await;
}

#[tokio::test]
async fn vote_from_another_device_converges_to_server_state() {
    let store = MemoryStore::new();
    let thread = store.create_thread(&UserId::from("tutor"), "Recurrences", "");
    let post = store.session("tutor").create_post(&thread, "Try the master theorem.").await.unwrap();

    let viewer = session(&store, "viewer");
    let alerts = RecordingAlerts::new();
    let live = mount_thread(&thread, &viewer, &alerts).await;

    // Same viewer, second device, no push: the surface still believes there is no vote.
    store
        .vote_elsewhere(&post.id, &UserId::from("viewer"), VoteAction::Upvote)
        .unwrap();
    let outcome = live.cast_vote(&post.id, VoteAction::Upvote).await;
    assert!(matches!(outcome.error, Some(SyncError::Conflict(_))), "got {:?}", outcome.error);
    assert_eq!(alerts.notices().len(), 1);

    // The server toggled the other device's vote off; the refetch shows it.
    let server = store.post(&post.id).unwrap();
    assert_eq!((server.upvote_count, server.downvote_count), (0, 0));
    let local = live.post(&post.id).unwrap();
    assert_eq!(VoteTally::of(&local), VoteTally::new(UserVote::None, 0, 0));
    live.unmount().await;
}

#[tokio::test]
async fn other_viewers_votes_arrive_through_thread_changes() {
    let store = MemoryStore::new();
    let thread = store.create_thread(&UserId::from("tutor"), "Probability", "");
    let post = store.session("tutor").create_post(&thread, "Condition on the first roll.").await.unwrap();

    let viewer = session(&store, "viewer");
    let alerts = RecordingAlerts::new();
    let live = mount_thread(&thread, &viewer, &alerts).await;

    store.session("peer").cast_vote(&post.id, VoteAction::Upvote).await.unwrap();
    assert!(eventually(|| live.post(&post.id).is_some_and(|p| p.upvote_count == 1)).await);
    assert_eq!(live.post(&post.id).unwrap().user_vote, UserVote::None);
    live.unmount().await;
}
