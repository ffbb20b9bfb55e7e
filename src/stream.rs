//! Streaming support types.

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::client::ClientError;

/// A response body, chunked however the transport delivers it.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Decoded content deltas, in receipt order.
pub type DeltaStream = BoxStream<'static, Result<String, ClientError>>;

pub use crate::sse::{is_done_marker, parse_sse_line, FrameDecoder, SseStreamExt};
