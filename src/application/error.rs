use thiserror::Error;

use crate::{
    application::repos::{GraphError, PublishError, RepoError},
    domain::{error::DomainError, types::PostId},
    infra::error::InfraError,
};

/// Failures surfaced by [`TimelineService`](crate::application::timeline::TimelineService).
///
/// Degraded side paths (follower resolution, cache maintenance, individual fan-out writes) are
/// logged and never appear here.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("invalid content: {0}")]
    InvalidContent(DomainError),
    #[error("author `{0}` does not exist")]
    AuthorNotFound(String),
    #[error("author lookup failed: {0}")]
    AuthorLookupFailed(GraphError),
    #[error("persistence failed: {0}")]
    PersistenceFailed(RepoError),
    #[error("post {post_id} was recorded but its created event was not published: {source}")]
    PublishFailed {
        post_id: PostId,
        #[source]
        source: PublishError,
    },
    #[error("operation cancelled")]
    Cancelled {
        /// Set when the post had already been recorded and possibly partly fanned out.
        post_id: Option<PostId>,
    },
}

impl TimelineError {
    /// Whether repeating the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TimelineError::InvalidContent(_) | TimelineError::AuthorNotFound(_) => false,
            TimelineError::AuthorLookupFailed(_)
            | TimelineError::PersistenceFailed(_)
            | TimelineError::PublishFailed { .. }
            | TimelineError::Cancelled { .. } => true,
        }
    }
}

/// Top-level error for the `murmur` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
