//! Posts and the rules they obey.
//!
//! A post is written once and never edited. Its length is measured in Unicode scalar values
//! (`char`s), so "héllo" is five characters regardless of its UTF-8 or UTF-16 encoding.

use std::sync::{Mutex, PoisonError};

use murmur_api_types::PostPayload;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use super::error::DomainError;
use super::types::{PostId, UserId};

/// Maximum post length in Unicode scalar values.
pub const MAX_POST_LENGTH: usize = 280;

/// Check that `content` holds between 1 and [`MAX_POST_LENGTH`] characters.
pub fn validate_content(content: &str) -> Result<(), DomainError> {
    if content.is_empty() {
        return Err(DomainError::EmptyContent);
    }
    let length = content.chars().count();
    if length > MAX_POST_LENGTH {
        return Err(DomainError::ContentTooLong {
            length,
            max: MAX_POST_LENGTH,
        });
    }
    Ok(())
}

/// A validated post that has not been persisted yet, so it has no id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    author_id: UserId,
    content: String,
    created_at: OffsetDateTime,
}

impl NewPost {
    pub fn new(
        author_id: UserId,
        content: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Result<Self, DomainError> {
        let content = content.into();
        validate_content(&content)?;
        Ok(Self {
            author_id,
            content,
            created_at,
        })
    }

    pub fn author_id(&self) -> &UserId {
        &self.author_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Attach the id handed out by the system of record.
    pub fn into_post(self, id: PostId) -> Post {
        Post {
            id,
            author_id: self.author_id,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

/// A recorded post, as stored globally and in every follower's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: UserId,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&Post> for PostPayload {
    fn from(post: &Post) -> Self {
        Self {
            id: post.id.as_uuid(),
            author_id: post.author_id.to_string(),
            content: post.content.clone(),
            created_at: post.created_at,
        }
    }
}

/// Sort posts most recent first, breaking timestamp ties by descending id.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Wall clock that strictly increases within one instance.
///
/// Timestamps are truncated to microseconds, the precision Postgres keeps, so a post read back
/// from storage compares equal to the one that was written. Two calls within the same microsecond
/// are spread one microsecond apart, keeping a single writer's posts in creation order.
#[derive(Debug)]
pub struct MonotonicClock {
    last: Mutex<OffsetDateTime>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(OffsetDateTime::UNIX_EPOCH),
        }
    }

    pub fn now(&self) -> OffsetDateTime {
        let now = truncate_to_micros(OffsetDateTime::now_utc());
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        *last = if now > *last {
            now
        } else {
            *last + Duration::MICROSECOND
        };
        *last
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_to_micros(value: OffsetDateTime) -> OffsetDateTime {
    let micros = value.microsecond();
    value.replace_microsecond(micros).unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn author() -> UserId {
        UserId::parse("alice").expect("valid user id")
    }

    #[test]
    fn content_length_boundaries() {
        assert_eq!(validate_content(""), Err(DomainError::EmptyContent));
        assert!(validate_content(&"a".repeat(MAX_POST_LENGTH)).is_ok());
        assert_eq!(
            validate_content(&"a".repeat(MAX_POST_LENGTH + 1)),
            Err(DomainError::ContentTooLong {
                length: 281,
                max: MAX_POST_LENGTH
            })
        );
    }

    #[test]
    fn content_length_counts_chars_not_bytes() {
        // 280 two-byte characters are 560 bytes but still within the limit.
        let accented = "é".repeat(MAX_POST_LENGTH);
        assert_eq!(accented.len(), 560);
        assert!(validate_content(&accented).is_ok());

        let emoji = "🦀".repeat(MAX_POST_LENGTH + 1);
        assert!(matches!(
            validate_content(&emoji),
            Err(DomainError::ContentTooLong { length: 281, .. })
        ));
    }

    #[test]
    fn new_post_keeps_fields_and_gains_id_on_persist() {
        let created_at = datetime!(2025-03-01 12:00 UTC);
        let draft = NewPost::new(author(), "hello", created_at).expect("valid post");
        let id = PostId::new_v4();
        let post = draft.into_post(id);

        assert_eq!(post.id, id);
        assert_eq!(post.author_id, author());
        assert_eq!(post.content, "hello");
        assert_eq!(post.created_at, created_at);
    }

    #[test]
    fn new_post_rejects_invalid_content() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            NewPost::new(author(), "", now),
            Err(DomainError::EmptyContent)
        );
    }

    #[test]
    fn sort_orders_newest_first_with_id_tie_break() {
        let t1 = datetime!(2025-01-01 00:00 UTC);
        let t2 = datetime!(2025-01-02 00:00 UTC);
        let low = PostId::from_uuid(uuid::Uuid::from_u128(1));
        let high = PostId::from_uuid(uuid::Uuid::from_u128(2));
        let make = |id, at| Post {
            id,
            author_id: author(),
            content: "x".to_string(),
            created_at: at,
        };

        let mut posts = vec![make(low, t1), make(low, t2), make(high, t2)];
        sort_newest_first(&mut posts);

        assert_eq!(posts[0].id, high);
        assert_eq!(posts[0].created_at, t2);
        assert_eq!(posts[1].id, low);
        assert_eq!(posts[1].created_at, t2);
        assert_eq!(posts[2].created_at, t1);
    }

    #[test]
    fn clock_is_strictly_increasing_and_microsecond_precise() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            assert_eq!(next.nanosecond() % 1_000, 0);
            previous = next;
        }
    }
}
