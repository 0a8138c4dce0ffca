//! Client-side data layer for the HR administration dashboard.
//!
//! Reads go through a shared [`cache::QueryCache`] keyed by operation and
//! arguments, writes through [`mutation::MutationDispatcher`] with optimistic
//! patches, and every request carries the credential held by
//! [`session::SessionStore`]. [`client::Api`] wires them together.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod mutation;
pub mod registry;
pub mod session;

#[cfg(test)]
mod testing;

pub use client::{Api, ApiBuilder};
pub use error::ApiError;
