//! In-memory query cache with tag invalidation and optimistic patches.
//!
//! This module provides an endpoint-agnostic cache that:
//! - Keys results by operation name and normalized arguments
//! - Shares one in-flight fetch between concurrent subscribers
//! - Evicts unobserved entries after a grace delay
//! - Refetches observed entries whose tags are invalidated
//! - Layers reversible optimistic patches over the fetched data

mod entry;
mod key;
pub mod patch;
mod store;
mod tag;

pub use entry::{EntrySnapshot, FetchStatus};
pub use key::CacheKey;
pub(crate) use key::normalize;
pub use patch::PatchOp;
pub use store::{
  FetchFuture, Fetcher, MutationId, PatchPlan, QueryCache, QuerySource, Subscription, TagsFn,
  DEFAULT_EVICTION_GRACE,
};
pub use tag::Tag;
