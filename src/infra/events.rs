//! Post-created event publishers.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use murmur_api_types::PostCreatedEvent;
use reqwest::{Client, Url};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::application::repos::{EventPublisher, PublishError};

use super::error::InfraError;
use super::graph::user_agent;

const CORRELATION_HEADER: &str = "x-correlation-id";

/// In-process fan-out of events to every live subscriber.
///
/// Events sent while nobody is subscribed are dropped.
#[derive(Clone, Debug)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<PostCreatedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: NonZeroUsize) -> Self {
        let (sender, _) = broadcast::channel(capacity.get());
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PostCreatedEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &PostCreatedEvent) -> Result<(), PublishError> {
        match self.sender.send(event.clone()) {
            Ok(receivers) => debug!(
                post_id = %event.post.id,
                correlation_id = %event.correlation_id,
                receivers,
                "post created event broadcast"
            ),
            Err(_) => debug!(
                post_id = %event.post.id,
                correlation_id = %event.correlation_id,
                "post created event had no subscribers"
            ),
        }
        Ok(())
    }
}

/// Delivers events as JSON `POST`s to a single webhook endpoint.
#[derive(Clone, Debug)]
pub struct WebhookPublisher {
    client: Client,
    url: Url,
}

impl WebhookPublisher {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::http(err.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, event: &PostCreatedEvent) -> Result<(), PublishError> {
        let body = serde_json::to_vec(event).map_err(|err| PublishError::Encode(err.to_string()))?;

        let resp = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(CORRELATION_HEADER, event.correlation_id.to_string())
            .body(body)
            .send()
            .await
            .map_err(|err| PublishError::Transport(err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(PublishError::Rejected {
                status: status.as_u16(),
            });
        }

        info!(
            post_id = %event.post.id,
            correlation_id = %event.correlation_id,
            "post created event delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use murmur_api_types::PostPayload;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;

    fn event() -> PostCreatedEvent {
        PostCreatedEvent::new(PostPayload {
            id: Uuid::new_v4(),
            author_id: "alice".to_string(),
            content: "hello".to_string(),
            created_at: OffsetDateTime::now_utc(),
        })
    }

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let publisher = BroadcastPublisher::new(NonZeroUsize::new(4).expect("non-zero"));
        let mut first = publisher.subscribe();
        let mut second = publisher.subscribe();
        let sent = event();

        publisher.publish(&sent).await.expect("publish");

        assert_eq!(first.recv().await.expect("first"), sent);
        assert_eq!(second.recv().await.expect("second"), sent);
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_not_an_error() {
        let publisher = BroadcastPublisher::new(NonZeroUsize::MIN);
        publisher.publish(&event()).await.expect("publish");
    }
}
