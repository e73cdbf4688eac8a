//! Producer-paced byte generator.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

/// A finite, zero-filled byte sequence emitted in fixed-size chunks.
///
/// The generator is single-use: converting it into a stream consumes it.
/// Chunks are exactly `chunk_size` bytes except the last, which carries
/// whatever remains of `total_length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedStream {
    total_length: usize,
    chunk_size: usize,
    inter_chunk_delay: Duration,
}

impl GeneratedStream {
    /// Default shape: 1 MiB in 10 KiB chunks, 50ms apart.
    pub const DEFAULT_LENGTH: usize = 1024 * 1024;
    pub const DEFAULT_CHUNK_SIZE: usize = 10 * 1024;
    pub const DEFAULT_DELAY: Duration = Duration::from_millis(50);

    /// A chunk size of 0 is treated as 1.
    pub fn new(total_length: usize, chunk_size: usize, inter_chunk_delay: Duration) -> Self {
        Self {
            total_length,
            chunk_size: chunk_size.max(1),
            inter_chunk_delay,
        }
    }

    pub fn total_length(&self) -> usize {
        self.total_length
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of chunks a full traversal yields.
    pub fn chunk_count(&self) -> usize {
        self.total_length.div_ceil(self.chunk_size)
    }

    /// Lazily produce the chunks, sleeping between successive ones.
    ///
    /// Dropping the stream mid-way drops any pending delay with it.
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        let Self {
            total_length,
            chunk_size,
            inter_chunk_delay,
        } = self;

        stream::unfold(0usize, move |emitted| async move {
            if emitted >= total_length {
                return None;
            }
            if emitted > 0 && !inter_chunk_delay.is_zero() {
                tokio::time::sleep(inter_chunk_delay).await;
            }
            let len = chunk_size.min(total_length - emitted);
            Some((Bytes::from(vec![0u8; len]), emitted + len))
        })
        .fuse()
    }

    /// Fallible form, for HTTP bodies and pipeline sources.
    pub fn into_try_stream(self) -> BoxStream<'static, Result<Bytes, Infallible>> {
        self.into_stream().map(Ok).boxed()
    }

    /// Use the generator as a streaming response body.
    pub fn into_body(self) -> Body {
        Body::from_stream(self.into_try_stream())
    }
}

impl Default for GeneratedStream {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_LENGTH,
            Self::DEFAULT_CHUNK_SIZE,
            Self::DEFAULT_DELAY,
        )
    }
}

/// Shorthand for [`GeneratedStream::new`] followed by `into_stream`.
pub fn generate(
    total_length: usize,
    chunk_size: usize,
    inter_chunk_delay: Duration,
) -> impl Stream<Item = Bytes> + Send + 'static {
    GeneratedStream::new(total_length, chunk_size, inter_chunk_delay).into_stream()
}
