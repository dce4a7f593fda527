use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use skypulse_protocol::CandidatePost;
use skypulse_protocol::CollectedPost;
use tracing::info;

use crate::topic::TopicFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Appended to the buffer.
    Accepted,
    /// A post with the same URI was already collected.
    Duplicate,
    /// Topic filter miss, or a reply.
    Rejected,
    /// The target was already reached; nothing was stored.
    Saturated,
}

/// Accumulates topical posts up to a fixed target.
///
/// Owned by a single session task, so no interior locking.
#[derive(Debug)]
pub struct BoundedCollector {
    target: NonZeroUsize,
    filter: Arc<TopicFilter>,
    posts: Vec<CollectedPost>,
    seen: HashSet<String>,
}

impl BoundedCollector {
    pub fn new(target: NonZeroUsize, filter: Arc<TopicFilter>) -> Self {
        Self {
            target,
            filter,
            posts: Vec::with_capacity(target.get()),
            seen: HashSet::new(),
        }
    }

    pub fn offer(&mut self, post: CandidatePost) -> OfferOutcome {
        if post.is_reply || !self.filter.matches(&post.text) {
            return OfferOutcome::Rejected;
        }
        if self.seen.contains(&post.uri) {
            return OfferOutcome::Duplicate;
        }
        if self.is_full() {
            return OfferOutcome::Saturated;
        }

        self.seen.insert(post.uri.clone());
        let ordinal = self.posts.len() + 1;
        info!(
            "collected post {ordinal}/{}: {}",
            self.target,
            preview(&post.text)
        );
        self.posts.push(CollectedPost { ordinal, post });
        OfferOutcome::Accepted
    }

    pub fn is_full(&self) -> bool {
        self.posts.len() >= self.target.get()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn target(&self) -> NonZeroUsize {
        self.target
    }

    /// Collected posts in acceptance order.
    pub fn snapshot(&self) -> Vec<CollectedPost> {
        self.posts.clone()
    }

    pub fn into_posts(self) -> Vec<CollectedPost> {
        self.posts
    }
}

fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 80;
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
