use crate::application::repos::RepoError;
use crate::domain::posts::Post;
use crate::domain::types::UserId;
use crate::infra::db::map_sqlx_error;

use super::PostgresRepositories;
use super::types::TimelineEntryRow;

impl PostgresRepositories {
    pub(super) async fn select_timeline(
        &self,
        owner: &UserId,
        limit: usize,
    ) -> Result<Vec<Post>, RepoError> {
        if limit == 0 {
            return Err(RepoError::invalid_input("timeline limit must be positive"));
        }
        let limit = i64::try_from(limit)
            .map_err(|_| RepoError::invalid_input("timeline limit exceeds supported range"))?;

        let rows = sqlx::query_as::<_, TimelineEntryRow>(
            r#"
            SELECT post_id, author_id, content, created_at
            FROM timeline_entries
            WHERE owner_id = $1
            ORDER BY created_at DESC, post_id DESC
            LIMIT $2
            "#,
        )
        .bind(owner.as_str())
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(Post::try_from).collect()
    }
}
