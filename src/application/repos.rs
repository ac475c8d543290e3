//! Port traits describing the adapters the timeline engine drives.
//!
//! Every operation takes shared references and returns owned data so implementations can be held
//! behind `Arc<dyn Trait>` and called from spawned tasks.

use async_trait::async_trait;
use murmur_api_types::PostCreatedEvent;
use thiserror::Error;

use crate::domain::posts::{NewPost, Post};
use crate::domain::types::{PostId, UserId};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("timeline cache unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event transport failed: {0}")]
    Transport(String),
    #[error("event rejected by subscriber with status {status}")]
    Rejected { status: u16 },
    #[error("failed to encode event: {0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("social graph request failed: {0}")]
    Transport(String),
    #[error("social graph answered with unexpected status {status}")]
    UnexpectedStatus { status: u16 },
    #[error("social graph returned an invalid payload: {0}")]
    Decode(String),
}

/// Durable storage: the global post table and the per-user denormalized timelines.
#[async_trait]
pub trait PostStore: Send + Sync {
    /// Record `post` in the global table and return the id it was assigned.
    async fn save_global(&self, post: &NewPost) -> Result<PostId, RepoError>;

    /// Insert `post` into `owner`'s timeline. Writing the same pair twice is a no-op.
    async fn write_timeline_entry(&self, owner: &UserId, post: &Post) -> Result<(), RepoError>;

    /// Up to `limit` entries of `owner`'s timeline, most recent first.
    async fn query_timeline(&self, owner: &UserId, limit: usize) -> Result<Vec<Post>, RepoError>;
}

/// Bounded, non-authoritative copy of the most recent slice of each user's timeline.
#[async_trait]
pub trait TimelineCache: Send + Sync {
    /// `Ok(None)` means the slice is not cached, never that the user has no posts.
    async fn get(&self, user: &UserId) -> Result<Option<Vec<Post>>, CacheError>;

    async fn set(&self, user: &UserId, posts: Vec<Post>) -> Result<(), CacheError>;

    /// Add `post` to an already cached slice and keep at most `max_len` entries.
    async fn push_and_trim(
        &self,
        user: &UserId,
        post: &Post,
        max_len: usize,
    ) -> Result<(), CacheError>;

    async fn invalidate(&self, user: &UserId) -> Result<(), CacheError>;

    /// Version of `user`'s slice, advanced by every `push_and_trim` and `invalidate`.
    async fn generation(&self, user: &UserId) -> Result<u64, CacheError>;

    /// [`set`](Self::set) unless `user`'s generation has moved past `generation`.
    ///
    /// Returns whether the slice was stored. A refill computed from a store read taken before a
    /// newer write must go through here so it cannot overwrite that write's invalidation.
    async fn set_if_generation(
        &self,
        user: &UserId,
        posts: Vec<Post>,
        generation: u64,
    ) -> Result<bool, CacheError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &PostCreatedEvent) -> Result<(), PublishError>;
}

/// Read side of the external social graph.
#[async_trait]
pub trait SocialGraph: Send + Sync {
    async fn user_exists(&self, user: &UserId) -> Result<bool, GraphError>;

    /// Followers of `user` at the time of the call.
    async fn followers(&self, user: &UserId) -> Result<Vec<UserId>, GraphError>;
}
