//! Wire types exchanged between murmur and neighbouring services.
//!
//! Nothing here carries behaviour; the engine converts to and from its own domain types at the
//! adapter boundary.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Name carried in [`PostCreatedEvent::kind`].
pub const POST_CREATED_KIND: &str = "post.created";

/// Announcement emitted once a post has been recorded and fanned out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCreatedEvent {
    pub kind: String,
    /// Stable across retries of the same event, so subscribers can deduplicate.
    pub correlation_id: Uuid,
    pub post: PostPayload,
}

impl PostCreatedEvent {
    pub fn new(post: PostPayload) -> Self {
        Self {
            kind: POST_CREATED_KIND.to_string(),
            correlation_id: Uuid::new_v4(),
            post,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPayload {
    pub id: Uuid,
    pub author_id: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Response body of `GET /users/{id}/followers` on the social graph service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowersResponse {
    #[serde(default)]
    pub followers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn post_created_event_serializes_rfc3339_timestamp() {
        let event = PostCreatedEvent {
            kind: POST_CREATED_KIND.to_string(),
            correlation_id: Uuid::nil(),
            post: PostPayload {
                id: Uuid::nil(),
                author_id: "alice".to_string(),
                content: "hello".to_string(),
                created_at: datetime!(2025-01-02 03:04:05 UTC),
            },
        };

        let value = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(value["kind"], "post.created");
        assert_eq!(value["post"]["created_at"], "2025-01-02T03:04:05Z");
        assert_eq!(value["post"]["author_id"], "alice");
    }

    #[test]
    fn followers_response_defaults_missing_list() {
        let parsed: FollowersResponse =
            serde_json::from_str("{}").expect("empty object should parse");
        assert!(parsed.followers.is_empty());
    }
}
