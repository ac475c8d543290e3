//! In-memory doubles for the engine's ports, with call counters and failure injection.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use murmur::application::repos::{
    CacheError, EventPublisher, GraphError, PostStore, PublishError, RepoError, SocialGraph,
    TimelineCache,
};
use murmur::application::timeline::{TimelineConfig, TimelineService};
use murmur::cache::{CacheConfig, TimelineStore};
use murmur::domain::posts::{NewPost, Post, sort_newest_first};
use murmur::domain::types::{PostId, UserId};
use murmur_api_types::PostCreatedEvent;

pub fn user(name: &str) -> UserId {
    UserId::parse(name).expect("valid user id")
}

#[derive(Default)]
pub struct MemoryStore {
    pub posts: Mutex<Vec<Post>>,
    pub timelines: Mutex<HashMap<UserId, Vec<Post>>>,
    pub save_calls: AtomicUsize,
    pub write_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub fail_save: AtomicBool,
    pub fail_query: AtomicBool,
    pub fail_writes_for: Mutex<HashSet<UserId>>,
    pub write_delay: Mutex<Duration>,
}

impl MemoryStore {
    pub fn timeline_of(&self, owner: &UserId) -> Vec<Post> {
        let mut posts = self
            .timelines
            .lock()
            .expect("timelines lock")
            .get(owner)
            .cloned()
            .unwrap_or_default();
        sort_newest_first(&mut posts);
        posts
    }

    pub fn all_posts(&self) -> Vec<Post> {
        self.posts.lock().expect("posts lock").clone()
    }

    pub fn fail_writes_for(&self, owner: &UserId) {
        self.fail_writes_for
            .lock()
            .expect("fail lock")
            .insert(owner.clone());
    }

    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock().expect("delay lock") = delay;
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn save_global(&self, post: &NewPost) -> Result<PostId, RepoError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("injected save failure"));
        }
        let id = PostId::new_v4();
        self.posts
            .lock()
            .expect("posts lock")
            .push(post.clone().into_post(id));
        Ok(id)
    }

    async fn write_timeline_entry(&self, owner: &UserId, post: &Post) -> Result<(), RepoError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.write_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes_for.lock().expect("fail lock").contains(owner) {
            return Err(RepoError::from_persistence("injected write failure"));
        }
        let mut timelines = self.timelines.lock().expect("timelines lock");
        let entries = timelines.entry(owner.clone()).or_default();
        if !entries.iter().any(|entry| entry.id == post.id) {
            entries.push(post.clone());
        }
        Ok(())
    }

    async fn query_timeline(&self, owner: &UserId, limit: usize) -> Result<Vec<Post>, RepoError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if limit == 0 {
            return Err(RepoError::invalid_input("timeline limit must be positive"));
        }
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(RepoError::from_persistence("injected query failure"));
        }
        let mut posts = self.timeline_of(owner);
        posts.truncate(limit);
        Ok(posts)
    }
}

/// Real [`TimelineStore`] behind counters, an optional write delay and a kill switch.
pub struct InstrumentedCache {
    pub inner: TimelineStore,
    pub get_calls: AtomicUsize,
    pub set_calls: AtomicUsize,
    pub push_calls: AtomicUsize,
    pub invalidate_calls: AtomicUsize,
    pub unavailable: AtomicBool,
    pub set_delay: Mutex<Duration>,
}

impl InstrumentedCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: TimelineStore::new(config),
            get_calls: AtomicUsize::new(0),
            set_calls: AtomicUsize::new(0),
            push_calls: AtomicUsize::new(0),
            invalidate_calls: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            set_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.set_delay.lock().expect("delay lock") = delay;
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CacheError::Unavailable("injected outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for InstrumentedCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[async_trait]
impl TimelineCache for InstrumentedCache {
    async fn get(&self, user: &UserId) -> Result<Option<Vec<Post>>, CacheError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(user).await
    }

    async fn set(&self, user: &UserId, posts: Vec<Post>) -> Result<(), CacheError> {
        let delay = *self.set_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set(user, posts).await
    }

    async fn push_and_trim(
        &self,
        user: &UserId,
        post: &Post,
        max_len: usize,
    ) -> Result<(), CacheError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.push_and_trim(user, post, max_len).await
    }

    async fn invalidate(&self, user: &UserId) -> Result<(), CacheError> {
        self.invalidate_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.invalidate(user).await
    }

    async fn generation(&self, user: &UserId) -> Result<u64, CacheError> {
        self.check()?;
        self.inner.generation(user).await
    }

    /// Counted as a `set`, after the configured delay.
    async fn set_if_generation(
        &self,
        user: &UserId,
        posts: Vec<Post>,
        generation: u64,
    ) -> Result<bool, CacheError> {
        let delay = *self.set_delay.lock().expect("delay lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set_if_generation(user, posts, generation).await
    }
}

#[derive(Default)]
pub struct StaticGraph {
    pub users: Mutex<HashSet<UserId>>,
    pub followers: Mutex<HashMap<UserId, Vec<UserId>>>,
    pub lookup_calls: AtomicUsize,
    pub fail_lookup: AtomicBool,
    pub fail_followers: AtomicBool,
}

impl StaticGraph {
    pub fn add_user(&self, name: &str) -> UserId {
        let id = user(name);
        self.users.lock().expect("users lock").insert(id.clone());
        id
    }

    pub fn follow(&self, author: &UserId, followers: &[UserId]) {
        self.followers
            .lock()
            .expect("followers lock")
            .entry(author.clone())
            .or_default()
            .extend(followers.iter().cloned());
    }
}

#[async_trait]
impl SocialGraph for StaticGraph {
    async fn user_exists(&self, user: &UserId) -> Result<bool, GraphError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(GraphError::UnexpectedStatus { status: 503 });
        }
        Ok(self.users.lock().expect("users lock").contains(user))
    }

    async fn followers(&self, user: &UserId) -> Result<Vec<UserId>, GraphError> {
        if self.fail_followers.load(Ordering::SeqCst) {
            return Err(GraphError::Transport("injected outage".to_string()));
        }
        Ok(self
            .followers
            .lock()
            .expect("followers lock")
            .get(user)
            .cloned()
            .unwrap_or_default())
    }
}

/// Publisher that fails the first `failures` attempts.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<PostCreatedEvent>>,
    pub attempts: AtomicUsize,
    pub failures: AtomicUsize,
}

impl RecordingPublisher {
    pub fn failing(times: usize) -> Self {
        let publisher = Self::default();
        publisher.failures.store(times, Ordering::SeqCst);
        publisher
    }

    pub fn events(&self) -> Vec<PostCreatedEvent> {
        self.published.lock().expect("published lock").clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &PostCreatedEvent) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::Rejected { status: 503 });
        }
        self.published
            .lock()
            .expect("published lock")
            .push(event.clone());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub cache: Arc<InstrumentedCache>,
    pub graph: Arc<StaticGraph>,
    pub publisher: Arc<RecordingPublisher>,
    pub service: TimelineService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(TimelineConfig::default(), RecordingPublisher::default())
    }

    pub fn with_config(config: TimelineConfig) -> Self {
        Self::with(config, RecordingPublisher::default())
    }

    pub fn with(config: TimelineConfig, publisher: RecordingPublisher) -> Self {
        let store = Arc::new(MemoryStore::default());
        let cache = Arc::new(InstrumentedCache::new(CacheConfig {
            max_entries: config.cache_max_entries,
            ..CacheConfig::default()
        }));
        let graph = Arc::new(StaticGraph::default());
        let publisher = Arc::new(publisher);
        let service = TimelineService::new(
            store.clone(),
            cache.clone(),
            publisher.clone(),
            graph.clone(),
            config,
        );
        Self {
            store,
            cache,
            graph,
            publisher,
            service,
        }
    }
}
