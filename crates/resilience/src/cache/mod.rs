//! Response cache
//!
//! - [`CacheKey`] / [`InvalidationPattern`] - key layout and write invalidation
//! - [`CacheStore`] - TTL-checked key/value table

mod keys;
mod store;

pub use keys::{CacheKey, InvalidationPattern, ALL_ENTITIES, ANY_SEGMENT};
pub use store::{CacheEntry, CacheStore, TtlClass, TtlConfig};
