use uuid::Uuid;

use crate::application::repos::RepoError;
use crate::domain::posts::{NewPost, Post};
use crate::domain::types::{PostId, UserId};
use crate::infra::db::map_sqlx_error;

use super::PostgresRepositories;

impl PostgresRepositories {
    pub(super) async fn insert_post(&self, post: &NewPost) -> Result<PostId, RepoError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO posts (id, author_id, content, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(post.author_id().as_str())
        .bind(post.content())
        .bind(post.created_at())
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(PostId::from_uuid(id))
    }

    pub(super) async fn insert_timeline_entry(
        &self,
        owner: &UserId,
        post: &Post,
    ) -> Result<(), RepoError> {
        sqlx::query(
            r#"
            INSERT INTO timeline_entries (owner_id, created_at, post_id, author_id, content)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(owner.as_str())
        .bind(post.created_at)
        .bind(post.id.as_uuid())
        .bind(post.author_id.as_str())
        .bind(post.content.as_str())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }
}
