//! Append-only persistent map.
//!
//! A durable `Map<K, V>` over sqlite in which keys, once written, never
//! change. Reads go through a bounded in-memory cache; multi-key writes run
//! inside an explicit transaction handle so a batch lands atomically or not
//! at all. The uniqueness machinery is the sole real consumer, but nothing
//! here knows about transactions or notaries.

pub mod error;
pub mod map;

pub use error::StoreError;
pub use map::{AppendOnlyMap, MapTransaction};
