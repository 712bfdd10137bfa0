//! Per-post vote state machine.
//!
//! Re-clicking the held vote withdraws it; clicking the other one switches.
//! The function is total over every (vote, action) pair. Callers serialize
//! actions per post; see [`crate::optimistic`].

use ag_core::{Post, PostId, UserVote, VoteAction, VoteTransition};

use crate::counters::{self, VoteCounts};

/// The viewer's vote plus the post's display totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteTally {
    pub user_vote: UserVote,
    pub upvotes: u32,
    pub downvotes: u32,
}

impl VoteTally {
    pub fn new(user_vote: UserVote, upvotes: u32, downvotes: u32) -> Self {
        Self {
            user_vote,
            upvotes,
            downvotes,
        }
    }

    pub fn of(post: &Post) -> Self {
        Self::new(post.user_vote, post.upvote_count, post.downvote_count)
    }

    pub fn counts(&self) -> VoteCounts {
        VoteCounts {
            upvotes: self.upvotes,
            downvotes: self.downvotes,
        }
    }

    pub fn write_to(&self, post: &mut Post) {
        post.user_vote = self.user_vote;
        post.upvote_count = self.upvotes;
        post.downvote_count = self.downvotes;
    }
}

/// The vote held after `action` is applied to `current`.
pub fn next_vote(current: UserVote, action: VoteAction) -> UserVote {
    match (current, action) {
        (UserVote::None, a) => a.as_vote(),
        (UserVote::Upvote, VoteAction::Upvote) => UserVote::None,
        (UserVote::Upvote, VoteAction::Downvote) => UserVote::Downvote,
        (UserVote::Downvote, VoteAction::Downvote) => UserVote::None,
        (UserVote::Downvote, VoteAction::Upvote) => UserVote::Upvote,
    }
}

/// `applyVote`: the tally after the viewer presses `action`.
pub fn apply_vote(current: VoteTally, action: VoteAction) -> VoteTally {
    let to = next_vote(current.user_vote, action);
    let counts = counters::recompute(current.counts(), current.user_vote, to);
    VoteTally {
        user_vote: to,
        upvotes: counts.upvotes,
        downvotes: counts.downvotes,
    }
}

/// Like [`apply_vote`], also returning the transition that drives counters
/// and rollback.
pub fn transition(post_id: &PostId, current: VoteTally, action: VoteAction) -> (VoteTally, VoteTransition) {
    let next = apply_vote(current, action);
    let transition = VoteTransition {
        post_id: post_id.clone(),
        from: current.user_vote,
        to: next.user_vote,
    };
    (next, transition)
}
