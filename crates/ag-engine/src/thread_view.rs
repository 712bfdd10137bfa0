//! One viewer's replica of a thread and its posts.

use ag_core::{
    Post, PostId, Result, SyncError, Thread, ThreadId, ThreadSnapshot, UserVote, VoteAction, VoteTransition,
};
use tracing::debug;

use crate::counters::{self, CounterDrift, ThreadCounters};
use crate::optimistic::Replica;
use crate::vote::{self, VoteTally};

#[derive(Debug, Clone, PartialEq)]
pub struct ThreadView {
    pub thread: Thread,
    /// Oldest first, as fetched.
    pub posts: Vec<Post>,
    /// Push subscription for thread changes is open.
    pub live: bool,
}

/// Header fields touched by follow and mark-answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntity {
    pub is_following: bool,
    pub answer: Option<PostId>,
}

impl ThreadView {
    /// Normalizes derived fields: reply count and solved flag follow the
    /// posts, not whatever the header claimed.
    pub fn from_snapshot(snapshot: ThreadSnapshot) -> Self {
        let mut view = Self {
            thread: snapshot.thread,
            posts: snapshot.posts,
            live: false,
        };
        view.normalize();
        view
    }

    fn normalize(&mut self) {
        self.thread.reply_count = self.posts.iter().filter(|p| !p.deleted).count() as u32;
        self.thread.is_solved = self.answer().is_some()
            && self.posts.iter().filter(|p| !p.deleted && p.is_marked_answer).count() == 1;
    }

    pub fn id(&self) -> &ThreadId {
        &self.thread.id
    }

    pub fn post(&self, id: &PostId) -> Option<&Post> {
        self.posts.iter().find(|p| &p.id == id)
    }

    fn post_mut(&mut self, id: &PostId) -> Result<&mut Post> {
        self.posts
            .iter_mut()
            .find(|p| &p.id == id && !p.deleted)
            .ok_or_else(|| SyncError::NotFound("Post".into(), id.to_string()))
    }

    /// The post currently marked as the answer.
    pub fn answer(&self) -> Option<&PostId> {
        self.posts
            .iter()
            .find(|p| !p.deleted && p.is_marked_answer)
            .map(|p| &p.id)
    }

    pub fn apply_vote(&mut self, post_id: &PostId, action: VoteAction) -> Result<VoteTransition> {
        let post = self.post_mut(post_id)?;
        let (next, transition) = vote::transition(post_id, VoteTally::of(post), action);
        next.write_to(post);
        Ok(transition)
    }

    /// At most one post carries the mark.
    pub fn mark_answer(&mut self, post_id: &PostId) -> Result<()> {
        self.post_mut(post_id)?;
        for post in &mut self.posts {
            post.is_marked_answer = &post.id == post_id;
        }
        self.normalize();
        Ok(())
    }

    pub fn set_following(&mut self, following: bool) {
        self.thread.is_following = following;
    }

    pub fn register_view(&mut self, server_count: u64) {
        let mut c = ThreadCounters::of(&self.thread);
        c.register_view(server_count);
        c.write_to(&mut self.thread);
    }

    /// Adds a freshly created reply. A reply already delivered by a refetch
    /// is not counted twice.
    pub fn record_reply(&mut self, post: Post) -> bool {
        if self.post(&post.id).is_some() {
            return false;
        }
        let mut c = ThreadCounters::of(&self.thread);
        c.record_reply();
        c.write_to(&mut self.thread);
        self.posts.push(post);
        true
    }

    /// Replaces the replica with a fresh server snapshot and reports vote
    /// counters that disagreed with the local values.
    pub fn reconcile(&mut self, snapshot: ThreadSnapshot) -> Vec<CounterDrift> {
        let drift: Vec<CounterDrift> = snapshot
            .posts
            .iter()
            .filter_map(|server| self.post(&server.id).and_then(|local| counters::detect_drift(local, server)))
            .collect();

        let mut c = ThreadCounters::of(&self.thread);
        c.reconcile(&snapshot.thread, snapshot.live_reply_count());

        let live = self.live;
        *self = Self::from_snapshot(snapshot);
        c.write_to(&mut self.thread);
        self.live = live;
        debug!(thread = %self.thread.id, drifted = drift.len(), "thread reconciled");
        drift
    }
}

/// The viewer's vote on one post.
///
/// Writing it back moves the vote from whatever the post holds now, so the
/// counts and answer mark that arrived meanwhile are kept. After a refetch
/// that already carries the server's vote, the write is a no-op.
impl Replica<PostId> for ThreadView {
    type Entity = Option<UserVote>;

    fn read_entity(&self, key: &PostId) -> Option<UserVote> {
        self.post(key).map(|p| p.user_vote)
    }

    fn write_entity(&mut self, key: &PostId, entity: Option<UserVote>) {
        let (Some(vote), Some(post)) = (entity, self.posts.iter_mut().find(|p| &p.id == key)) else {
            return;
        };
        let current = VoteTally::of(post);
        let counts = counters::recompute(current.counts(), current.user_vote, vote);
        VoteTally::new(vote, counts.upvotes, counts.downvotes).write_to(post);
    }
}

impl Replica<ThreadId> for ThreadView {
    type Entity = HeaderEntity;

    fn read_entity(&self, _key: &ThreadId) -> HeaderEntity {
        HeaderEntity {
            is_following: self.thread.is_following,
            answer: self.answer().cloned(),
        }
    }

    fn write_entity(&mut self, _key: &ThreadId, entity: HeaderEntity) {
        self.thread.is_following = entity.is_following;
        for post in &mut self.posts {
            post.is_marked_answer = entity.answer.as_ref() == Some(&post.id);
        }
        self.normalize();
    }
}
