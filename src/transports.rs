//! Completion transport implementations.

pub mod http;

pub use http::HttpCompletionTransport;
