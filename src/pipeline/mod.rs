//! Request → response data path.
//!
//! # Data Flow
//! ```text
//! request body ──▶ [buffer fully] ──▶ [throttle] ──▶ BodySink ══▶ response body
//!   source           optional           optional        sink
//! ```
//!
//! A [`Pipeline`] has exactly one source, at most one throttle and exactly
//! one sink. It runs as a single task whose result is the number of bytes
//! moved or a [`PipelineError`]; failures are logged, never raised into the
//! connection.

pub mod sink;
pub mod throttle;

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::header::CONTENT_LENGTH;
use axum::response::Response;
use axum::BoxError;
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::task::JoinHandle;

pub use sink::BodySink;
pub use throttle::Throttle;

/// Failure in any pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source stream yielded an error (e.g. the client aborted the upload).
    #[error("source stream failed: {0}")]
    Source(#[source] BoxError),

    /// The request body could not be materialised in memory.
    #[error("failed to buffer request body: {0}")]
    Buffering(#[source] axum::Error),

    /// The response side went away before the source was exhausted.
    #[error("response closed before the pipeline finished")]
    SinkClosed,
}

/// Boxed source stage.
pub type ByteStream = BoxStream<'static, Result<Bytes, PipelineError>>;

/// Source, optional throttle, sink.
pub struct Pipeline {
    source: ByteStream,
    throttle: Option<Throttle>,
}

impl Pipeline {
    pub fn new<S, E>(source: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            source: source.map_err(|e| PipelineError::Source(e.into())).boxed(),
            throttle: None,
        }
    }

    /// Stream the body through as it arrives.
    pub fn from_body(body: Body) -> Self {
        Self::new(body.into_data_stream())
    }

    /// Replay an already received body.
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::new(stream::once(async move { Ok::<_, PipelineError>(bytes) }))
    }

    /// Materialise the whole body first, then replay it.
    pub async fn buffered(body: Body) -> Result<Self, PipelineError> {
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(PipelineError::Buffering)?;
        Ok(Self::from_bytes(bytes))
    }

    /// Insert a throttle stage when `rate` is set.
    pub fn throttle(mut self, rate: Option<u64>) -> Self {
        self.throttle = rate.map(Throttle::new);
        self
    }

    /// Stage names in execution order.
    pub fn stages(&self) -> Vec<&'static str> {
        let mut stages = vec!["source"];
        if self.throttle.is_some() {
            stages.push("throttle");
        }
        stages.push("sink");
        stages
    }

    /// Move every chunk from the source to `sink`, in order.
    pub async fn run(self, sink: BodySink) -> Result<u64, PipelineError> {
        let Pipeline {
            mut source,
            mut throttle,
        } = self;
        let mut transferred = 0u64;

        while let Some(item) = source.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    sink.abort(&e).await;
                    return Err(e);
                }
            };

            match throttle.as_mut() {
                Some(throttle) => {
                    for piece in throttle.split(chunk) {
                        throttle.admit(piece.len()).await;
                        transferred += piece.len() as u64;
                        sink.write(piece).await?;
                    }
                }
                None => {
                    transferred += chunk.len() as u64;
                    sink.write(chunk).await?;
                }
            }
        }

        Ok(transferred)
    }

    /// Run on a background task, logging the outcome.
    pub fn spawn(self, sink: BodySink) -> JoinHandle<Result<u64, PipelineError>> {
        tokio::spawn(async move {
            let result = self.run(sink).await;
            match &result {
                Ok(bytes) => tracing::trace!(bytes, "Pipeline finished"),
                Err(e) => tracing::warn!(error = %e, "Server warning: pipeline failed"),
            }
            result
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages())
            .field("throttle", &self.throttle)
            .finish()
    }
}

/// Echo `request`'s body into a streaming response.
///
/// A declared `Content-Length` is mirrored onto the response before any
/// byte moves. With `use_buffering` the whole body is received before the
/// response is produced; `rate` adds a throttle stage in either mode.
pub async fn compose(
    request: Request,
    use_buffering: bool,
    rate: Option<u64>,
) -> Result<Response, PipelineError> {
    let (parts, body) = request.into_parts();
    let content_length = parts.headers.get(CONTENT_LENGTH).cloned();

    let pipeline = if use_buffering {
        Pipeline::buffered(body).await?
    } else {
        Pipeline::from_body(body)
    }
    .throttle(rate);

    tracing::trace!(stages = ?pipeline.stages(), "Starting pipeline");

    let (sink, body) = BodySink::channel();
    pipeline.spawn(sink);

    let mut response = Response::new(body);
    if let Some(length) = content_length {
        response.headers_mut().insert(CONTENT_LENGTH, length);
    }
    Ok(response)
}
