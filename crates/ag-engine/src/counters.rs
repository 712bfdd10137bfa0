//! Aggregate display counters.
//!
//! Vote totals are recomputed from a transition plus the last known
//! baseline. Nothing here fetches; a refetch only happens when
//! [`detect_drift`] reports that the server disagrees.

use ag_core::{Post, PostId, Thread, UserVote, VoteTransition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteCounts {
    pub upvotes: u32,
    pub downvotes: u32,
}

impl VoteCounts {
    pub fn of(post: &Post) -> Self {
        Self {
            upvotes: post.upvote_count,
            downvotes: post.downvote_count,
        }
    }

    pub fn total(&self) -> u64 {
        u64::from(self.upvotes) + u64::from(self.downvotes)
    }

    fn without(mut self, vote: UserVote) -> Self {
        // Clamped at zero: a stale baseline must not underflow.
        match vote {
            UserVote::None => {}
            UserVote::Upvote => self.upvotes = self.upvotes.saturating_sub(1),
            UserVote::Downvote => self.downvotes = self.downvotes.saturating_sub(1),
        }
        self
    }

    fn with(mut self, vote: UserVote) -> Self {
        match vote {
            UserVote::None => {}
            UserVote::Upvote => self.upvotes = self.upvotes.saturating_add(1),
            UserVote::Downvote => self.downvotes = self.downvotes.saturating_add(1),
        }
        self
    }
}

/// Moves one vote from `from` to `to` on top of `baseline`.
pub fn recompute(baseline: VoteCounts, from: UserVote, to: UserVote) -> VoteCounts {
    if from == to {
        return baseline;
    }
    baseline.without(from).with(to)
}

pub fn apply_transition(baseline: VoteCounts, transition: &VoteTransition) -> VoteCounts {
    recompute(baseline, transition.from, transition.to)
}

/// Local and server vote totals for one post disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterDrift {
    pub post_id: PostId,
    pub local: VoteCounts,
    pub server: VoteCounts,
}

pub fn detect_drift(local: &Post, server: &Post) -> Option<CounterDrift> {
    let (l, s) = (VoteCounts::of(local), VoteCounts::of(server));
    (l != s || local.user_vote != server.user_vote).then(|| CounterDrift {
        post_id: local.id.clone(),
        local: l,
        server: s,
    })
}

/// Thread-level counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadCounters {
    pub view_count: u64,
    pub reply_count: u32,
}

impl ThreadCounters {
    pub fn of(thread: &Thread) -> Self {
        Self {
            view_count: thread.view_count,
            reply_count: thread.reply_count,
        }
    }

    /// Views never go down, even when an older server value arrives late.
    pub fn register_view(&mut self, server_count: u64) {
        self.view_count = self.view_count.max(server_count);
    }

    pub fn record_reply(&mut self) {
        self.reply_count = self.reply_count.saturating_add(1);
    }

    pub fn remove_reply(&mut self) {
        self.reply_count = self.reply_count.saturating_sub(1);
    }

    /// Merge with a fresh server header. Replies follow the server, views
    /// keep the larger value.
    pub fn reconcile(&mut self, server: &Thread, live_posts: u32) {
        self.register_view(server.view_count);
        self.reply_count = live_posts;
    }

    pub fn write_to(&self, thread: &mut Thread) {
        thread.view_count = self.view_count;
        thread.reply_count = self.reply_count;
    }
}
