use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::posts::Post;
use crate::domain::types::{PostId, UserId};

#[derive(sqlx::FromRow)]
pub(crate) struct TimelineEntryRow {
    pub(crate) post_id: Uuid,
    pub(crate) author_id: String,
    pub(crate) content: String,
    pub(crate) created_at: OffsetDateTime,
}

impl TryFrom<TimelineEntryRow> for Post {
    type Error = RepoError;

    fn try_from(row: TimelineEntryRow) -> Result<Self, Self::Error> {
        let author_id = UserId::parse(row.author_id).map_err(|err| {
            RepoError::from_persistence(format!(
                "timeline entry {} has a corrupt author id: {err}",
                row.post_id
            ))
        })?;
        Ok(Self {
            id: PostId::from_uuid(row.post_id),
            author_id,
            content: row.content,
            created_at: row.created_at,
        })
    }
}
