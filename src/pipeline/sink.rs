//! Response body sink fed by a running pipeline.

use std::io;

use axum::body::{Body, Bytes};
use futures_util::stream;
use tokio::sync::mpsc;

use crate::pipeline::PipelineError;

/// Chunks buffered between the pipeline task and the transport.
const SINK_CAPACITY: usize = 1;

/// Write half of a streaming response body.
///
/// The read half is an [`axum::body::Body`] handed to the transport; the
/// small channel in between carries backpressure from the client socket
/// back to the pipeline.
#[derive(Debug)]
pub struct BodySink {
    tx: mpsc::Sender<Result<Bytes, io::Error>>,
}

impl BodySink {
    /// Create a sink and the response body it feeds.
    pub fn channel() -> (Self, Body) {
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let body = Body::from_stream(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        }));
        (Self { tx }, body)
    }

    /// Send one chunk, waiting for room.
    pub async fn write(&self, chunk: Bytes) -> Result<(), PipelineError> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| PipelineError::SinkClosed)
    }

    /// Abort the response so the client sees a truncated body.
    pub async fn abort(&self, reason: &PipelineError) {
        let _ = self
            .tx
            .send(Err(io::Error::new(io::ErrorKind::BrokenPipe, reason.to_string())))
            .await;
    }
}
