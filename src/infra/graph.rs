//! HTTP client for the social graph service.
//!
//! `GET {base}/users/{id}` answers 200 when the user exists and 404 when it does not;
//! `GET {base}/users/{id}/followers` answers `{"followers": ["id", ...]}`.

use std::time::Duration;

use async_trait::async_trait;
use murmur_api_types::FollowersResponse;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use crate::application::repos::{GraphError, SocialGraph};
use crate::domain::types::UserId;

use super::error::InfraError;

#[derive(Clone, Debug)]
pub struct HttpSocialGraph {
    client: Client,
    base: Url,
}

impl HttpSocialGraph {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, InfraError> {
        if base.cannot_be_a_base() {
            return Err(InfraError::configuration(format!(
                "social graph url `{base}` cannot be used as a base"
            )));
        }
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http(err.to_string()))?;
        Ok(Self { client, base })
    }

    fn user_url(&self, user: &UserId, tail: Option<&str>) -> Result<Url, GraphError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| GraphError::Transport("base url cannot hold a path".to_string()))?;
            segments.pop_if_empty().push("users").push(user.as_str());
            if let Some(tail) = tail {
                segments.push(tail);
            }
        }
        Ok(url)
    }
}

pub(crate) fn user_agent() -> &'static str {
    concat!("murmur/", env!("CARGO_PKG_VERSION"))
}

#[async_trait]
impl SocialGraph for HttpSocialGraph {
    async fn user_exists(&self, user: &UserId) -> Result<bool, GraphError> {
        let url = self.user_url(user, None)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| GraphError::Transport(err.to_string()))?;

        match resp.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(GraphError::UnexpectedStatus {
                status: status.as_u16(),
            }),
        }
    }

    async fn followers(&self, user: &UserId) -> Result<Vec<UserId>, GraphError> {
        let url = self.user_url(user, Some("followers"))?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| GraphError::Transport(err.to_string()))?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!(user_id = %user, "social graph has no follower list for user");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(GraphError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        let body: FollowersResponse = resp
            .json()
            .await
            .map_err(|err| GraphError::Decode(err.to_string()))?;

        let mut followers = Vec::with_capacity(body.followers.len());
        for raw in body.followers {
            match UserId::parse(raw) {
                Ok(follower) => followers.push(follower),
                Err(err) => warn!(user_id = %user, error = %err, "skipping malformed follower id"),
            }
        }
        Ok(followers)
    }
}
