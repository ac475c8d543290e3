use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("post content is empty")]
    EmptyContent,
    #[error("post content is {length} characters, the limit is {max}")]
    ContentTooLong { length: usize, max: usize },
    #[error("user id is empty")]
    EmptyUserId,
}
