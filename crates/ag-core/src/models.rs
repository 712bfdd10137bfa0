//! # Domain Models
//!
//! These structs represent the discussion and notification entities the
//! sync engine replicates. Identifiers are opaque strings minted by the
//! external data store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Account identifier issued by the identity collaborator.
    UserId
);
opaque_id!(ThreadId);
opaque_id!(PostId);
opaque_id!(
    /// Notification identifier. Also the tie-breaker when two notifications
    /// share a `created_at`.
    NotificationId
);

/// The viewer's vote on a single post. A user holds at most one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserVote {
    #[default]
    None,
    Upvote,
    Downvote,
}

/// The button the viewer pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteAction {
    Upvote,
    Downvote,
}

impl VoteAction {
    /// The vote held after this action lands on a post with no prior vote.
    pub fn as_vote(self) -> UserVote {
        match self {
            VoteAction::Upvote => UserVote::Upvote,
            VoteAction::Downvote => UserVote::Downvote,
        }
    }
}

/// What the server reports after `cast_vote`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteOutcome {
    VoteAdded,
    VoteRemoved,
    VoteChanged,
}

/// Before/after pair for one vote. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTransition {
    pub post_id: PostId,
    pub from: UserVote,
    pub to: UserVote,
}

impl VoteTransition {
    /// The server response a correct remote `cast_vote` must produce for this
    /// transition. `None` when the transition does not change anything.
    pub fn expected_outcome(&self) -> Option<VoteOutcome> {
        match (self.from, self.to) {
            (a, b) if a == b => None,
            (UserVote::None, _) => Some(VoteOutcome::VoteAdded),
            (_, UserVote::None) => Some(VoteOutcome::VoteRemoved),
            _ => Some(VoteOutcome::VoteChanged),
        }
    }
}

/// A reply inside a thread, as seen by one viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub thread_id: ThreadId,
    pub author_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub upvote_count: u32,
    pub downvote_count: u32,
    pub is_marked_answer: bool,
    /// Scoped to the viewing user.
    pub user_vote: UserVote,
    #[serde(default)]
    pub deleted: bool,
}

/// A discussion thread header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub creator_id: UserId,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    /// Never decreases.
    pub view_count: u64,
    /// Number of non-deleted posts.
    pub reply_count: u32,
    /// Scoped to the viewing user.
    pub is_following: bool,
    pub is_solved: bool,
}

/// `fetch_thread` result: the header plus every post, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    pub thread: Thread,
    pub posts: Vec<Post>,
}

impl ThreadSnapshot {
    /// True iff exactly one live post carries the answer mark.
    pub fn derive_is_solved(&self) -> bool {
        self.posts
            .iter()
            .filter(|p| !p.deleted && p.is_marked_answer)
            .count()
            == 1
    }

    pub fn live_reply_count(&self) -> u32 {
        self.posts.iter().filter(|p| !p.deleted).count() as u32
    }

    pub fn post(&self, id: &PostId) -> Option<&Post> {
        self.posts.iter().find(|p| &p.id == id)
    }
}

/// Every notification kind the platform emits. Closed on purpose: a new kind
/// has to be added here and to [`NotificationKind::presentation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Message,
    GroupPost,
    GroupJoin,
    BadgeEarned,
    System,
    ForumReply,
    AnswerAccepted,
}

/// How a surface renders a notification kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presentation {
    pub icon: &'static str,
    pub label: &'static str,
}

impl NotificationKind {
    pub fn presentation(self) -> Presentation {
        let (icon, label) = match self {
            NotificationKind::Message => ("message-circle", "New message"),
            NotificationKind::GroupPost => ("users", "Study group post"),
            NotificationKind::GroupJoin => ("user-plus", "New group member"),
            NotificationKind::BadgeEarned => ("award", "Badge earned"),
            NotificationKind::System => ("bell", "System"),
            NotificationKind::ForumReply => ("message-square", "New reply"),
            NotificationKind::AnswerAccepted => ("check-circle", "Answer accepted"),
        };
        Presentation { icon, label }
    }
}

/// A notification owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub content: String,
    pub action_url: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
