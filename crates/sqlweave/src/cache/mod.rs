//! Session-local result caching.
//!
//! [`CacheKey`] identifies a query invocation by value equality over its
//! ordered components; [`LocalCache`] is the executor-owned key→result
//! store with a building sentinel for in-flight queries.

mod key;
mod local;

pub use key::CacheKey;
pub use local::{CacheEntry, LocalCache};
