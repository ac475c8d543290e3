//! LRU-bounded map of per-user timeline slices.

use std::collections::VecDeque;
use std::sync::{LockResult, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use tracing::{trace, warn};

use crate::application::repos::{CacheError, TimelineCache};
use crate::domain::posts::{Post, sort_newest_first};
use crate::domain::types::UserId;

use super::config::CacheConfig;

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "murmur_timeline_cache_hit_total";
const METRIC_MISS: &str = "murmur_timeline_cache_miss_total";
const METRIC_EVICT: &str = "murmur_timeline_cache_evict_total";

type Slices = LruCache<UserId, CachedTimeline>;

struct CachedTimeline {
    /// Most recent first.
    posts: VecDeque<Post>,
    stored_at: Instant,
}

/// Per-user slice versions used to reject refills that lost a race with a newer write.
struct Generations {
    current: LruCache<UserId, u64>,
    last_issued: u64,
    /// Highest generation dropped from `current`. Users without an entry report it, so an
    /// eviction can only make a pending refill look stale, never fresh.
    floor: u64,
}

impl Generations {
    fn new(config: &CacheConfig) -> Self {
        Self {
            current: LruCache::new(config.max_users_non_zero()),
            last_issued: 0,
            floor: 0,
        }
    }

    fn current(&mut self, user: &UserId) -> u64 {
        if let Some(generation) = self.current.get(user) {
            return *generation;
        }
        let floor = self.floor;
        self.track(user, floor);
        floor
    }

    fn advance(&mut self, user: &UserId) {
        self.last_issued += 1;
        let next = self.last_issued;
        self.track(user, next);
    }

    fn track(&mut self, user: &UserId, generation: u64) {
        if let Some((evicted, dropped)) = self.current.push(user.clone(), generation)
            && &evicted != user
        {
            self.floor = self.floor.max(dropped);
        }
    }
}

pub struct TimelineStore {
    /// Lock order: `generations` before `slices`.
    generations: Mutex<Generations>,
    slices: Mutex<Slices>,
    config: CacheConfig,
}

impl TimelineStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            generations: Mutex::new(Generations::new(&config)),
            slices: Mutex::new(LruCache::new(config.max_users_non_zero())),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of users with a cached slice, expired ones included.
    pub fn len(&self) -> usize {
        self.lock("len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock("clear").clear();
    }

    fn is_expired(&self, slice: &CachedTimeline) -> bool {
        self.config
            .ttl
            .is_some_and(|ttl| slice.stored_at.elapsed() >= ttl)
    }

    fn store_slice(&self, slices: &mut Slices, user: &UserId, mut posts: Vec<Post>) {
        sort_newest_first(&mut posts);
        posts.truncate(self.config.max_entries_non_zero());

        let slice = CachedTimeline {
            posts: posts.into(),
            stored_at: Instant::now(),
        };
        if let Some((evicted, _)) = slices.push(user.clone(), slice)
            && &evicted != user
        {
            counter!(METRIC_EVICT).increment(1);
            trace!(user_id = %evicted, "timeline slice evicted");
        }
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, Slices> {
        recover(self.slices.lock(), op)
    }

    fn lock_generations(&self, op: &'static str) -> MutexGuard<'_, Generations> {
        recover(self.generations.lock(), op)
    }
}

fn recover<'a, T>(result: LockResult<MutexGuard<'a, T>>, op: &'static str) -> MutexGuard<'a, T> {
    match result {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = SOURCE,
                result = "poisoned_recovered",
                "Recovered from poisoned timeline cache lock"
            );
            poisoned.into_inner()
        }
    }
}

#[async_trait]
impl TimelineCache for TimelineStore {
    async fn get(&self, user: &UserId) -> Result<Option<Vec<Post>>, CacheError> {
        let mut slices = self.lock("get");
        let expired = match slices.get(user) {
            None => {
                counter!(METRIC_MISS).increment(1);
                return Ok(None);
            }
            Some(slice) => self.is_expired(slice),
        };
        if expired {
            slices.pop(user);
            counter!(METRIC_MISS).increment(1);
            trace!(user_id = %user, "expired timeline slice dropped");
            return Ok(None);
        }

        let mut posts: Vec<Post> = slices
            .peek(user)
            .map(|slice| slice.posts.iter().cloned().collect())
            .unwrap_or_default();
        drop(slices);

        sort_newest_first(&mut posts);
        counter!(METRIC_HIT).increment(1);
        Ok(Some(posts))
    }

    async fn set(&self, user: &UserId, posts: Vec<Post>) -> Result<(), CacheError> {
        let mut slices = self.lock("set");
        self.store_slice(&mut slices, user, posts);
        Ok(())
    }

    async fn push_and_trim(
        &self,
        user: &UserId,
        post: &Post,
        max_len: usize,
    ) -> Result<(), CacheError> {
        let mut generations = self.lock_generations("push_and_trim");
        generations.advance(user);
        let mut slices = self.lock("push_and_trim");

        let expired = match slices.peek(user) {
            // A lone post in an empty slot would read as the whole timeline.
            None => return Ok(()),
            Some(slice) => self.is_expired(slice),
        };
        if expired {
            slices.pop(user);
            return Ok(());
        }

        let Some(slice) = slices.peek_mut(user) else {
            return Ok(());
        };
        if slice.posts.iter().any(|cached| cached.id == post.id) {
            return Ok(());
        }
        let key = (post.created_at, post.id);
        let position = slice
            .posts
            .iter()
            .position(|cached| (cached.created_at, cached.id) < key)
            .unwrap_or(slice.posts.len());
        slice.posts.insert(position, post.clone());
        slice
            .posts
            .truncate(max_len.min(self.config.max_entries_non_zero()).max(1));
        Ok(())
    }

    async fn invalidate(&self, user: &UserId) -> Result<(), CacheError> {
        let mut generations = self.lock_generations("invalidate");
        generations.advance(user);
        self.lock("invalidate").pop(user);
        Ok(())
    }

    async fn generation(&self, user: &UserId) -> Result<u64, CacheError> {
        Ok(self.lock_generations("generation").current(user))
    }

    async fn set_if_generation(
        &self,
        user: &UserId,
        posts: Vec<Post>,
        generation: u64,
    ) -> Result<bool, CacheError> {
        let mut generations = self.lock_generations("set_if_generation");
        if generations.current(user) != generation {
            trace!(user_id = %user, generation, "stale timeline refill discarded");
            return Ok(false);
        }
        let mut slices = self.lock("set_if_generation");
        self.store_slice(&mut slices, user, posts);
        Ok(true)
    }
}
