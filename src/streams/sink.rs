//! Draining sink for generated or received streams.

use axum::body::Bytes;
use futures_util::stream::{Stream, StreamExt};

/// Consumes a byte stream, counting what passes through.
///
/// With `echo` enabled every chunk is logged at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoSink {
    echo: bool,
}

impl EchoSink {
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }

    /// Drain `stream` to the end and return the number of bytes seen.
    pub async fn drain<S>(&self, stream: S) -> u64
    where
        S: Stream<Item = Bytes>,
    {
        let mut stream = std::pin::pin!(stream);
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            if self.echo {
                tracing::debug!(len = chunk.len(), chunk = ?chunk, "Echo chunk");
            }
            total += chunk.len() as u64;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::{GeneratedStream, PullPaced};
    use std::time::Duration;

    #[tokio::test]
    async fn counts_generated_bytes() {
        let sink = EchoSink::new(true);
        let generated = GeneratedStream::new(1234, 100, Duration::ZERO).into_stream();
        assert_eq!(sink.drain(generated).await, 1234);
    }

    #[tokio::test(start_paused = true)]
    async fn counts_pulled_bytes() {
        let sink = EchoSink::default();
        let pulled = PullPaced::new("chunk", 4, Duration::from_millis(5)).into_stream();
        assert_eq!(sink.drain(pulled).await, 20);
    }
}
