//! Bounded-concurrency fan-out of a post into follower timelines.
//!
//! A single dispatch loop feeds follower ids into a bounded channel drained by a fixed set of
//! worker tasks, so the number of in-flight store writes never exceeds the worker count no matter
//! how many followers a post has.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::application::repos::PostStore;
use crate::domain::posts::Post;
use crate::domain::types::UserId;

const METRIC_FANOUT_WRITES: &str = "murmur_fanout_writes_total";
const METRIC_FANOUT_MS: &str = "murmur_fanout_ms";

pub const DEFAULT_FANOUT_WORKERS: usize = 50;
pub const DEFAULT_FANOUT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutConfig {
    pub workers: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            workers: NonZeroUsize::new(DEFAULT_FANOUT_WORKERS).unwrap_or(NonZeroUsize::MIN),
            queue_capacity: NonZeroUsize::new(DEFAULT_FANOUT_QUEUE_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Outcome of one fan-out run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Followers handed to a worker, in dispatch order (a prefix of the input).
    pub dispatched: usize,
    /// Followers whose timeline entry was written.
    pub delivered: Vec<UserId>,
    pub failed: usize,
    /// The dispatch loop stopped early because the caller cancelled.
    pub cancelled: bool,
}

#[derive(Clone)]
pub struct FanoutWorkerPool {
    store: Arc<dyn PostStore>,
    config: FanoutConfig,
}

impl FanoutWorkerPool {
    pub fn new(store: Arc<dyn PostStore>, config: FanoutConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> FanoutConfig {
        self.config
    }

    /// Write `post` into every follower's timeline and wait for the dispatched writes to finish.
    ///
    /// Cancelling `cancel` stops dispatch; followers already queued are still written.
    #[instrument(skip_all, fields(post_id = %post.id, followers = followers.len()))]
    pub async fn fan_out(
        &self,
        post: Arc<Post>,
        followers: &[UserId],
        cancel: &CancellationToken,
    ) -> FanoutReport {
        if followers.is_empty() {
            return FanoutReport::default();
        }

        let started_at = Instant::now();
        let worker_count = self.config.workers.get().min(followers.len());
        let (sender, receiver) = mpsc::channel::<UserId>(self.config.queue_capacity.get());
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let receiver = Arc::clone(&receiver);
            let store = Arc::clone(&self.store);
            let post = Arc::clone(&post);
            workers.spawn(async move {
                let mut delivered = Vec::new();
                let mut failed = 0usize;
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(follower) = next else {
                        break;
                    };
                    match store.write_timeline_entry(&follower, &post).await {
                        Ok(()) => {
                            counter!(METRIC_FANOUT_WRITES, "result" => "ok").increment(1);
                            delivered.push(follower);
                        }
                        Err(err) => {
                            counter!(METRIC_FANOUT_WRITES, "result" => "error").increment(1);
                            warn!(
                                worker,
                                follower_id = %follower,
                                post_id = %post.id,
                                error = %err,
                                "timeline entry write failed"
                            );
                            failed += 1;
                        }
                    }
                }
                (delivered, failed)
            });
        }

        let mut report = FanoutReport::default();
        for follower in followers {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                sent = sender.send(follower.clone()) => {
                    if sent.is_err() {
                        // Every worker has exited; nothing left to drain the queue.
                        break;
                    }
                    report.dispatched += 1;
                }
            }
        }
        drop(sender);

        if report.cancelled {
            warn!(
                post_id = %post.id,
                dispatched = report.dispatched,
                remaining = followers.len() - report.dispatched,
                "fan-out cancelled, draining queued writes"
            );
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((delivered, failed)) => {
                    report.delivered.extend(delivered);
                    report.failed += failed;
                }
                Err(err) => warn!(post_id = %post.id, error = %err, "fan-out worker aborted"),
            }
        }

        histogram!(METRIC_FANOUT_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        debug!(
            dispatched = report.dispatched,
            delivered = report.delivered.len(),
            failed = report.failed,
            "fan-out finished"
        );
        report
    }
}
