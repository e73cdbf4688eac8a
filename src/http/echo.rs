//! Default echo/inspection handler.
//!
//! Every path answers with a JSON description of the request it received:
//!
//! ```text
//! { url, pathname, params, method, headers, body? | form?, files? }
//! ```
//!
//! `body` is the hex-encoded request body; multipart requests get `form`
//! and `files` instead. A numeric, non-zero `delay` query parameter holds
//! the response back by that many milliseconds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Version};
use axum::response::{IntoResponse, Response};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;

use crate::config::ServerConfig;
use crate::http::form::{FileInfo, FormParser, MultipartParser};
use crate::http::handler::{HandlerError, Reply, RequestHandler};
use crate::http::server::{ServerHandle, TransportServer};
use crate::net::BindError;

/// Echo response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EchoBody {
    pub url: String,
    pub pathname: String,
    pub params: BTreeMap<String, String>,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<BTreeMap<String, Vec<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<BTreeMap<String, Vec<FileInfo>>>,
}

/// Catch-all inspection endpoint.
#[derive(Clone)]
pub struct EchoHandler {
    forms: Arc<dyn FormParser>,
}

impl EchoHandler {
    pub fn new() -> Self {
        Self::with_form_parser(MultipartParser)
    }

    /// Use a different multipart parser.
    pub fn with_form_parser<P: FormParser>(parser: P) -> Self {
        Self {
            forms: Arc::new(parser),
        }
    }

    async fn respond(forms: Arc<dyn FormParser>, request: Request) -> Result<Response, HandlerError> {
        let uri = request.uri().clone();
        let params = query_params(uri.query());

        let mut echo = EchoBody {
            url: uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string()),
            pathname: uri.path().to_string(),
            method: request.method().to_string(),
            headers: request_headers(&request),
            params,
            body: None,
            form: None,
            files: None,
        };

        if let Some(delay) = echo.params.get("delay").and_then(|d| parse_delay(d)) {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Delaying echo response");
            tokio::time::sleep(delay).await;
        }

        // No route table: every path, `/echo/json` included, echoes.
        let is_multipart = echo
            .headers
            .get(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with("multipart/"));

        if is_multipart {
            let form = forms.parse(request).await?;
            echo.form = Some(form.fields);
            echo.files = Some(form.files);
        } else {
            let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
                .await
                .map_err(HandlerError::Body)?;
            echo.body = Some(hex::encode(&bytes));
        }

        Ok(Reply::new(echo).into_response())
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EchoHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoHandler").finish_non_exhaustive()
    }
}

impl RequestHandler for EchoHandler {
    fn handle(&self, request: Request) -> BoxFuture<'static, Result<Response, HandlerError>> {
        Self::respond(Arc::clone(&self.forms), request).boxed()
    }
}

/// Start a plain server on `port` serving [`EchoHandler`].
pub async fn start_echo_server(port: u16) -> Result<ServerHandle, BindError> {
    TransportServer::start(ServerConfig::with_handler(EchoHandler::new()).port(port)).await
}

/// Query string as a map; a repeated key keeps its last value.
fn query_params(query: Option<&str>) -> BTreeMap<String, String> {
    query
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

/// Echoed headers. HTTP/2 requests also report their pseudo-headers.
fn request_headers(request: &Request) -> BTreeMap<String, String> {
    let mut headers = flatten_headers(request.headers());
    if request.version() == Version::HTTP_2 {
        let uri = request.uri();
        headers.insert(":method".into(), request.method().to_string());
        if let Some(pq) = uri.path_and_query() {
            headers.insert(":path".into(), pq.as_str().to_string());
        }
        if let Some(scheme) = uri.scheme_str() {
            headers.insert(":scheme".into(), scheme.to_string());
        }
        if let Some(authority) = uri.authority() {
            headers.insert(":authority".into(), authority.to_string());
        }
    }
    headers
}

/// Header map with lowercase names; repeated headers are joined with `", "`.
fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    flat
}

/// Largest delay honored, in milliseconds (a signed 32-bit timer).
const MAX_DELAY_MS: f64 = i32::MAX as f64;

/// What an out-of-range delay collapses to.
const OVERFLOW_DELAY: Duration = Duration::from_millis(1);

/// `Some` for numeric, non-zero values. Negative delays sleep for zero;
/// delays past [`MAX_DELAY_MS`] (infinity included) sleep for 1 ms.
fn parse_delay(raw: &str) -> Option<Duration> {
    let ms = raw.trim().parse::<f64>().ok()?;
    if ms.is_nan() || ms == 0.0 {
        return None;
    }
    if ms > MAX_DELAY_MS {
        return Some(OVERFLOW_DELAY);
    }
    Some(Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).unwrap_or(OVERFLOW_DELAY))
}
