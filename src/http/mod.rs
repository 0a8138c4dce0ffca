//! HTTP plumbing: the raw transport and the credential-aware wrapper.

mod auth;
mod transport;

pub use auth::AuthenticatedTransport;
pub use transport::{HttpResponse, HttpTransport, Method, RequestDescriptor, Transport};
