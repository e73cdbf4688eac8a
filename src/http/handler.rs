//! Request handler capability and dispatch boundary.
//!
//! # Responsibilities
//! - Define what a handler is ([`RequestHandler`])
//! - Provide the built-in stream echo handler
//! - Contain handler failures (errors and panics) at the transport boundary

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode, Version};
use axum::response::{IntoResponse, Response};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;

use crate::http::form::FormParseError;
use crate::pipeline::{self, PipelineError};

/// Failure raised by a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("form parsing failed: {0}")]
    Form(#[from] FormParseError),

    /// Reading the request body failed.
    #[error("request body error: {0}")]
    Body(#[source] axum::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{0}")]
    Message(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    pub fn msg(message: impl Into<String>) -> Self {
        HandlerError::Message(message.into())
    }
}

/// Anything that turns a request into a response.
///
/// Closures `Fn(Request) -> impl Future<Output = Result<impl IntoResponse, HandlerError>>`
/// are handlers. Streaming handlers return a response whose body is still
/// being produced; value handlers return a [`Reply`].
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> BoxFuture<'static, Result<Response, HandlerError>>;
}

pub type SharedHandler = Arc<dyn RequestHandler>;

impl<F, Fut, R> RequestHandler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    R: IntoResponse,
{
    fn handle(&self, request: Request) -> BoxFuture<'static, Result<Response, HandlerError>> {
        let fut = (self)(request);
        async move { fut.await.map(IntoResponse::into_response) }.boxed()
    }
}

/// A `{status, headers, body}` value, serialized as pretty JSON.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub status: StatusCode,
    pub headers: BTreeMap<String, String>,
    pub body: T,
}

impl<T: Serialize> Reply<T> {
    pub fn new(body: T) -> Self {
        Self {
            status: StatusCode::OK,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        let json = match serde_json::to_string_pretty(&self.body) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize reply body");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let mut response = (self.status, json).into_response();
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in self.headers {
            match (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "Dropping invalid reply header"),
            }
        }
        response
    }
}

/// Pipes the request body back as the response body.
///
/// This is what a server runs when its configuration names no handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamEcho {
    pub use_buffering: bool,
    pub rate: Option<u64>,
}

impl StreamEcho {
    pub fn new(use_buffering: bool, rate: Option<u64>) -> Self {
        Self {
            use_buffering,
            rate,
        }
    }

    /// Straight request-to-response pipe, no buffering, no throttle.
    pub fn passthrough() -> Self {
        Self::default()
    }
}

impl RequestHandler for StreamEcho {
    fn handle(&self, request: Request) -> BoxFuture<'static, Result<Response, HandlerError>> {
        let Self {
            use_buffering,
            rate,
        } = *self;
        async move {
            pipeline::compose(request, use_buffering, rate)
                .await
                .map_err(HandlerError::from)
        }
        .boxed()
    }
}

/// Route every request to the configured handler.
///
/// Errors and panics stop here: they are logged, and the client gets a
/// bare 500. HTTP/1.x connections are asked to close afterwards.
pub(crate) async fn dispatch(State(handler): State<SharedHandler>, request: Request) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let outcome = AssertUnwindSafe(handler.handle(request)).catch_unwind().await;

    let error = match outcome {
        Ok(Ok(response)) => return response,
        Ok(Err(e)) => e,
        Err(panic) => HandlerError::Panicked(panic_message(panic.as_ref())),
    };

    tracing::error!(method = %method, uri = %uri, error = %error, "HTTP server error: handler failed");
    failure_response(version)
}

fn failure_response(version: Version) -> Response {
    let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
    if matches!(version, Version::HTTP_10 | Version::HTTP_11) {
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    response
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn post(body: &'static str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler: SharedHandler = Arc::new(|_req: Request| async {
            Ok::<_, HandlerError>((StatusCode::CREATED, "made"))
        });

        let response = dispatch(State(handler), post("")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_string(response).await, "made");
    }

    #[tokio::test]
    async fn reply_is_pretty_json_with_headers() {
        let reply = Reply::new(serde_json::json!({ "a": 1 }))
            .status(StatusCode::ACCEPTED)
            .header("x-custom", "yes");

        let response = reply.into_response();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["x-custom"], "yes");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body_string(response).await, "{\n  \"a\": 1\n}");
    }

    #[tokio::test]
    async fn handler_errors_become_500_with_close() {
        let handler: SharedHandler =
            Arc::new(|_req: Request| async { Err::<(), _>(HandlerError::msg("boom")) });

        let response = dispatch(State(handler), post("")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }

    #[tokio::test]
    async fn handler_panics_are_contained() {
        let handler: SharedHandler = Arc::new(|_req: Request| async {
            if true {
                panic!("handler exploded");
            }
            Ok::<_, HandlerError>(())
        });

        let response = dispatch(State(handler), post("")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn stream_echo_returns_the_body() {
        let handler: SharedHandler = Arc::new(StreamEcho::new(true, None));
        let response = dispatch(State(handler), post("ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "ping");
    }
}
