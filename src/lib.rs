//! # chatrelay - Streaming chat client
//!
//! Sends a conversation to a completion endpoint and streams the assistant's
//! reply back into an observable conversation state, token by token.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Incremental Server-Sent Events decoding, independent of chunk boundaries
//! - One in-flight session per conversation, cancellable at any point
//! - Observable state through a broadcast channel of [`ChatEvent`]s
//! - Signed upload/download URL requests through [`files::FilesClient`]
//!
//! ## Architecture
//!
//! - **[`ChatController`]**: the entry point; admits sends, runs sessions and
//!   tears them down
//! - **[`CompletionTransport`]**: issues the request and hands back the raw
//!   body; [`transports::HttpCompletionTransport`] is the `reqwest` version
//! - **[`sse`]**: turns body chunks into content deltas
//! - **[`ConversationStore`]**: message list, loading/streaming flags and the
//!   surfaced error
//!
//! ## Example
//! ```no_run
//! use chatrelay::{ChatController, ChatEvent, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = ChatController::from_config(&ClientConfig::from_env()?)?;
//!     let mut events = controller.subscribe();
//!
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let ChatEvent::MessageUpdated { content, .. } = event {
//!                 println!("{content}");
//!             }
//!         }
//!     });
//!
//!     let outcome = controller.send_message("How does AI work?").await;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

mod accumulator;
pub mod client;
pub mod controller;
pub mod files;
pub mod http;
pub mod model;
pub mod options;
pub mod session;
pub mod sse;
pub mod store;
pub mod stream;
pub mod transports;

#[cfg(test)]
mod test_utils;

// Re-exports for convenience
pub use client::{ClientError, CompletionResponse, CompletionTransport};
pub use controller::{ChatController, SendOutcome, SkipReason};
pub use model::{ChatError, Message, MessageId, Role, StreamingState};
pub use options::ClientConfig;
pub use store::{ChatEvent, ChatSnapshot, ConversationStore};
