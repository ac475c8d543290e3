//! Post creation with fan-out-on-write, and cache-aside timeline reads.
//!
//! Only two outcomes are strict: whether a post was durably recorded, and whether a timeline
//! could be read from the store on a cache miss. Follower resolution, cache maintenance and
//! individual fan-out writes degrade to a log line and a counter.

use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use metrics::counter;
use murmur_api_types::{PostCreatedEvent, PostPayload};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::application::error::TimelineError;
use crate::application::fanout::{FanoutConfig, FanoutWorkerPool};
use crate::application::repos::{EventPublisher, PostStore, SocialGraph, TimelineCache};
use crate::domain::posts::{MonotonicClock, NewPost, Post};
use crate::domain::types::{PostId, UserId};

const METRIC_POSTS_CREATED: &str = "murmur_posts_created_total";
const METRIC_TIMELINE_READS: &str = "murmur_timeline_reads_total";
const METRIC_PUBLISH_FAILURES: &str = "murmur_publish_failures_total";
const METRIC_DEGRADED: &str = "murmur_degraded_total";

pub const DEFAULT_QUERY_LIMIT: usize = 50;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100;
pub const DEFAULT_CACHE_REFILL_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_CACHE_REFILL_GUARD: Duration = Duration::from_secs(1);

/// How followers' cached timelines are brought up to date once fan-out has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMaintenance {
    /// Drop each follower's cached slice; the next read refills it from the store.
    #[default]
    InvalidateAfterFanout,
    /// Insert the post into slices that are already cached.
    PushAndTrim,
}

/// What happens when the post-created event cannot be published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishPolicy {
    /// The failure is returned to the caller even though the post is already recorded.
    #[default]
    Strict,
    /// Publish from a background task with retries; the caller never sees the failure.
    BestEffort {
        max_attempts: NonZeroU32,
        backoff: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct TimelineConfig {
    pub query_limit: usize,
    pub cache_max_entries: usize,
    pub cache_refill_timeout: Duration,
    pub cache_refill_guard: Duration,
    pub cache_maintenance: CacheMaintenance,
    pub publish_policy: PublishPolicy,
    pub fanout: FanoutConfig,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            query_limit: DEFAULT_QUERY_LIMIT,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_refill_timeout: DEFAULT_CACHE_REFILL_TIMEOUT,
            cache_refill_guard: DEFAULT_CACHE_REFILL_GUARD,
            cache_maintenance: CacheMaintenance::default(),
            publish_policy: PublishPolicy::default(),
            fanout: FanoutConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct TimelineService {
    store: Arc<dyn PostStore>,
    cache: Arc<dyn TimelineCache>,
    publisher: Arc<dyn EventPublisher>,
    graph: Arc<dyn SocialGraph>,
    fanout: FanoutWorkerPool,
    clock: Arc<MonotonicClock>,
    config: TimelineConfig,
}

impl TimelineService {
    pub fn new(
        store: Arc<dyn PostStore>,
        cache: Arc<dyn TimelineCache>,
        publisher: Arc<dyn EventPublisher>,
        graph: Arc<dyn SocialGraph>,
        config: TimelineConfig,
    ) -> Self {
        let fanout = FanoutWorkerPool::new(Arc::clone(&store), config.fanout);
        Self {
            store,
            cache,
            publisher,
            graph,
            fanout,
            clock: Arc::new(MonotonicClock::new()),
            config,
        }
    }

    pub fn config(&self) -> &TimelineConfig {
        &self.config
    }

    /// Record a post, fan it out to the author's followers and announce it.
    ///
    /// Returns the id assigned by the store. Fan-out is complete (or cancelled) when this
    /// returns; under [`PublishPolicy::Strict`] a publish failure is reported as
    /// [`TimelineError::PublishFailed`] although the post has been recorded. Cancellation after
    /// the post was recorded carries its id in [`TimelineError::Cancelled`].
    #[instrument(skip_all, fields(author_id = %author_id))]
    pub async fn create_post(
        &self,
        author_id: &UserId,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<PostId, TimelineError> {
        self.ensure_author(author_id, cancel).await?;

        let draft = NewPost::new(author_id.clone(), content, self.clock.now())
            .map_err(TimelineError::InvalidContent)?;

        let post_id = cancellable(cancel, self.store.save_global(&draft))
            .await?
            .map_err(TimelineError::PersistenceFailed)?;
        let post = Arc::new(draft.into_post(post_id));
        counter!(METRIC_POSTS_CREATED).increment(1);

        let followers = self.resolve_followers(author_id).await;
        let report = self
            .fanout
            .fan_out(Arc::clone(&post), &followers, cancel)
            .await;

        // Runs after fan-out so a refill racing with the writes cannot leave a stale slice.
        self.maintain_caches(&post, &followers[..report.dispatched], &report.delivered)
            .await;

        self.publish(&post, cancel).await?;

        info!(
            post_id = %post.id,
            followers = followers.len(),
            delivered = report.delivered.len(),
            failed = report.failed,
            "post created"
        );
        Ok(post_id)
    }

    /// Read `user_id`'s timeline, most recent first.
    ///
    /// Served from the cache when a non-empty slice is cached; otherwise read from the store and
    /// written back to the cache without holding the caller past the refill guard window.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn get_timeline(
        &self,
        user_id: &UserId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Post>, TimelineError> {
        match self.cache.get(user_id).await {
            Ok(Some(mut posts)) if !posts.is_empty() => {
                // Pushes can grow a slice past the read limit.
                posts.truncate(self.config.query_limit);
                counter!(METRIC_TIMELINE_READS, "source" => "cache").increment(1);
                debug!(entries = posts.len(), "timeline served from cache");
                return Ok(posts);
            }
            Ok(_) => {}
            Err(err) => degraded("cache_read", user_id, None, &err),
        }

        // Taken before the store read so the refill is dropped if a newer write lands meanwhile.
        let generation = match self.cache.generation(user_id).await {
            Ok(generation) => Some(generation),
            Err(err) => {
                degraded("cache_generation", user_id, None, &err);
                None
            }
        };

        let posts = cancellable(
            cancel,
            self.store.query_timeline(user_id, self.config.query_limit),
        )
        .await?
        .map_err(TimelineError::PersistenceFailed)?;
        counter!(METRIC_TIMELINE_READS, "source" => "store").increment(1);

        if let Some(generation) = generation
            && !posts.is_empty()
        {
            self.refill_cache(user_id.clone(), posts.clone(), generation)
                .await;
        }
        Ok(posts)
    }

    async fn ensure_author(
        &self,
        author_id: &UserId,
        cancel: &CancellationToken,
    ) -> Result<(), TimelineError> {
        let exists = cancellable(cancel, self.graph.user_exists(author_id))
            .await?
            .map_err(TimelineError::AuthorLookupFailed)?;
        if exists {
            Ok(())
        } else {
            Err(TimelineError::AuthorNotFound(author_id.to_string()))
        }
    }

    /// Snapshot of the author's followers, deduplicated in first-seen order.
    async fn resolve_followers(&self, author_id: &UserId) -> Vec<UserId> {
        match self.graph.followers(author_id).await {
            Ok(followers) => {
                let mut seen = HashSet::with_capacity(followers.len());
                followers
                    .into_iter()
                    .filter(|follower| seen.insert(follower.clone()))
                    .collect()
            }
            Err(err) => {
                degraded("followers", author_id, None, &err);
                Vec::new()
            }
        }
    }

    async fn maintain_caches(&self, post: &Post, dispatched: &[UserId], delivered: &[UserId]) {
        let concurrency = self.fanout.config().workers.get();
        match self.config.cache_maintenance {
            CacheMaintenance::InvalidateAfterFanout => {
                stream::iter(dispatched)
                    .for_each_concurrent(concurrency, |follower| async move {
                        if let Err(err) = self.cache.invalidate(follower).await {
                            degraded("cache_invalidate", follower, Some(post.id), &err);
                        }
                    })
                    .await;
            }
            CacheMaintenance::PushAndTrim => {
                let max_len = self.config.cache_max_entries;
                stream::iter(delivered)
                    .for_each_concurrent(concurrency, |follower| async move {
                        if let Err(err) = self.cache.push_and_trim(follower, post, max_len).await {
                            degraded("cache_push", follower, Some(post.id), &err);
                        }
                    })
                    .await;
            }
        }
    }

    async fn publish(&self, post: &Post, cancel: &CancellationToken) -> Result<(), TimelineError> {
        let event = PostCreatedEvent::new(PostPayload::from(post));

        match self.config.publish_policy {
            PublishPolicy::Strict => match cancellable(cancel, self.publisher.publish(&event))
                .await
                .map_err(|_| TimelineError::Cancelled {
                    post_id: Some(post.id),
                })? {
                Ok(()) => {
                    debug!(
                        post_id = %post.id,
                        correlation_id = %event.correlation_id,
                        "post created event published"
                    );
                    Ok(())
                }
                Err(source) => {
                    counter!(METRIC_PUBLISH_FAILURES).increment(1);
                    Err(TimelineError::PublishFailed {
                        post_id: post.id,
                        source,
                    })
                }
            },
            PublishPolicy::BestEffort {
                max_attempts,
                backoff,
            } => {
                let publisher = Arc::clone(&self.publisher);
                tokio::spawn(publish_with_retry(publisher, event, max_attempts, backoff));
                Ok(())
            }
        }
    }

    /// Write `posts` back to the cache on a detached task bounded by the refill timeout, waiting
    /// for it no longer than the guard window. The write is skipped if `user_id`'s slice has been
    /// invalidated or pushed to since `generation` was read.
    async fn refill_cache(&self, user_id: UserId, posts: Vec<Post>, generation: u64) {
        let cache = Arc::clone(&self.cache);
        let timeout = self.config.cache_refill_timeout;
        let mut refill = tokio::spawn(async move {
            let write = cache.set_if_generation(&user_id, posts, generation);
            match tokio::time::timeout(timeout, write).await {
                Ok(Ok(true)) => debug!(user_id = %user_id, "timeline cache refilled"),
                Ok(Ok(false)) => debug!(
                    user_id = %user_id,
                    generation,
                    "timeline cache refill superseded by a newer write"
                ),
                Ok(Err(err)) => degraded("cache_refill", &user_id, None, &err),
                Err(_) => degraded(
                    "cache_refill",
                    &user_id,
                    None,
                    &format!("timed out after {timeout:?}"),
                ),
            }
        });

        if tokio::time::timeout(self.config.cache_refill_guard, &mut refill)
            .await
            .is_err()
        {
            debug!("timeline cache refill outlived the guard window, continuing in background");
        }
    }
}

async fn publish_with_retry(
    publisher: Arc<dyn EventPublisher>,
    event: PostCreatedEvent,
    max_attempts: NonZeroU32,
    backoff: Duration,
) {
    let max_attempts = max_attempts.get();
    for attempt in 1..=max_attempts {
        match publisher.publish(&event).await {
            Ok(()) => {
                debug!(
                    post_id = %event.post.id,
                    correlation_id = %event.correlation_id,
                    attempt,
                    "post created event published"
                );
                return;
            }
            Err(err) => {
                warn!(
                    post_id = %event.post.id,
                    correlation_id = %event.correlation_id,
                    attempt,
                    max_attempts,
                    error = %err,
                    "post created event publish failed"
                );
                if attempt < max_attempts {
                    tokio::time::sleep(backoff * attempt).await;
                }
            }
        }
    }

    counter!(METRIC_PUBLISH_FAILURES).increment(1);
    error!(
        post_id = %event.post.id,
        correlation_id = %event.correlation_id,
        "post created event dropped after exhausting retries"
    );
}

/// Race `future` against the caller's cancellation token.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, TimelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TimelineError::Cancelled { post_id: None }),
        output = future => Ok(output),
    }
}

fn degraded(path: &'static str, user_id: &UserId, post_id: Option<PostId>, err: &dyn Display) {
    counter!(METRIC_DEGRADED, "path" => path).increment(1);
    match post_id {
        Some(post_id) => warn!(path, user_id = %user_id, post_id = %post_id, error = %err, "degraded"),
        None => warn!(path, user_id = %user_id, error = %err, "degraded"),
    }
}
