//! # ag-engine
//!
//! The discussion/notification synchronization engine.
//!
//! Leaves first:
//! - [`vote`]: three-state vote toggle for one viewer on one post.
//! - [`counters`]: display counters recomputed from a vote transition.
//! - [`optimistic`]: apply locally, call remote, keep or roll back.
//! - [`feed`]: merges polled and pushed notifications into one list.
//! - [`surface`]: independently mounted consumers (bell, notification
//!   page, live thread) each owning their replica, timer and subscription.

pub mod cell;
pub mod counters;
pub mod feed;
pub mod optimistic;
pub mod surface;
pub mod thread_view;
pub mod vote;

pub use cell::StateCell;
pub use feed::{FeedState, PollReport, PushEffect};
pub use optimistic::{Confirmation, MutationCoordinator, MutationOutcome, Replica};
pub use surface::{
    FeedOptions, NotificationSurface, SurfaceKind, ThreadOptions, ThreadSurface,
};
pub use thread_view::ThreadView;
pub use vote::{apply_vote, VoteTally};
