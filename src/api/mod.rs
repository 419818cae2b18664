//! Transport: client trait, HTTP implementation, error taxonomy, envelopes.

pub mod client;
pub mod envelope;
pub mod error;
#[cfg(test)]
pub mod fake;

pub use client::{ApiResponse, HttpClient, Method, RemoteClient};
pub use envelope::{CategoryEnvelope, ItemEnvelope, ListEnvelope, MutationEnvelope};
pub use error::ApiError;
