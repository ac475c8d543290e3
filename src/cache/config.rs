//! Cache configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_MAX_USERS: usize = 10_000;
const DEFAULT_MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Users whose slices are kept before the least recently used one is evicted.
    pub max_users: usize,
    /// Posts kept per cached slice.
    pub max_entries: usize,
    /// Slices older than this are treated as absent. `None` keeps them until evicted.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_users: DEFAULT_MAX_USERS,
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: None,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_users: settings.max_users.get(),
            max_entries: settings.max_entries.get(),
            ttl: settings.ttl,
        }
    }
}

impl CacheConfig {
    /// Returns the user limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_users_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_users).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the per-slice limit, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> usize {
        self.max_entries.max(1)
    }
}
