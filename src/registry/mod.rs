//! Declarative table of the operations the dashboard can perform.
//!
//! Every read declares the tags its data provides and every write declares
//! the tags it invalidates; writes may also declare an optimistic patch
//! planner. The table is built once and never mutated afterwards.

pub mod auth;
mod endpoint;
pub mod resources;

pub use endpoint::{
  InvalidatesFn, MutationEndpoint, OptimisticFn, ProvidesFn, QueryEndpoint, Registry, RequestFn,
};
pub use resources::Resource;
