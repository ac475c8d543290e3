mod read;
mod types;
mod write;

use async_trait::async_trait;

use crate::application::repos::{PostStore, RepoError};
use crate::domain::posts::{NewPost, Post};
use crate::domain::types::{PostId, UserId};

use super::PostgresRepositories;

#[async_trait]
impl PostStore for PostgresRepositories {
    async fn save_global(&self, post: &NewPost) -> Result<PostId, RepoError> {
        self.insert_post(post).await
    }

    async fn write_timeline_entry(&self, owner: &UserId, post: &Post) -> Result<(), RepoError> {
        self.insert_timeline_entry(owner, post).await
    }

    async fn query_timeline(&self, owner: &UserId, limit: usize) -> Result<Vec<Post>, RepoError> {
        self.select_timeline(owner, limit).await
    }
}
