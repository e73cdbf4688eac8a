//! Consumer-paced byte generator.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

/// Emits the same chunk `n` times, one per pull, each after a fixed wait.
///
/// Nothing happens until the consumer asks for the next item, so the pace
/// is set by the consumer's demand plus the interval. After the `n`-th
/// chunk the next pull waits once more and then ends the stream; later
/// pulls return `None` immediately.
#[derive(Debug, Clone)]
pub struct PullPaced {
    chunk: Bytes,
    pulls: usize,
    interval: Duration,
}

impl PullPaced {
    pub fn new(chunk: impl Into<Bytes>, pulls: usize, interval: Duration) -> Self {
        Self {
            chunk: chunk.into(),
            pulls,
            interval,
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        let Self {
            chunk,
            pulls,
            interval,
        } = self;

        stream::unfold(pulls, move |remaining| {
            let chunk = chunk.clone();
            async move {
                tokio::time::sleep(interval).await;
                if remaining == 0 {
                    None
                } else {
                    Some((chunk, remaining - 1))
                }
            }
        })
        .fuse()
    }

    pub fn into_try_stream(self) -> BoxStream<'static, Result<Bytes, Infallible>> {
        self.into_stream().map(Ok).boxed()
    }

    pub fn into_body(self) -> Body {
        Body::from_stream(self.into_try_stream())
    }
}

impl Default for PullPaced {
    /// Ten `chunk` strings, 100ms apart.
    fn default() -> Self {
        Self::new(Bytes::from_static(b"chunk"), 10, Duration::from_millis(100))
    }
}
