//! HTTP plumbing for artifact retrieval.

mod client;

pub use client::{HttpClient, HttpClientConfig, HttpError};
