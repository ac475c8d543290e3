//! Identifier newtypes shared across layers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;

/// Opaque user identifier owned by the social graph service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Build an identifier, rejecting blank input.
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::EmptyUserId);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Post identifier assigned by the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(Uuid);

impl PostId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for PostId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_blank() {
        assert_eq!(UserId::parse(""), Err(DomainError::EmptyUserId));
        assert_eq!(UserId::parse("   "), Err(DomainError::EmptyUserId));
        assert_eq!(UserId::parse("alice").map(|id| id.into_inner()), Ok("alice".to_string()));
    }

    #[test]
    fn ids_serialize_transparently() {
        let user = UserId::parse("bob").expect("valid id");
        assert_eq!(serde_json::to_string(&user).expect("serialize"), "\"bob\"");

        let post = PostId::from_uuid(Uuid::nil());
        assert_eq!(
            serde_json::to_string(&post).expect("serialize"),
            "\"00000000-0000-0000-0000-000000000000\""
        );
    }
}
