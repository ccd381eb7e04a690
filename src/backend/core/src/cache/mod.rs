//! Pluggable cache backing the plugin Cache capability.

pub mod backend;

pub use backend::{CacheBackend, CacheEntry, InMemoryBackend, RedisBackend};
