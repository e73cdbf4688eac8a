//! Multipart form parsing capability.

use std::collections::BTreeMap;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{FromRequest, Multipart, Request};
use futures_util::future::{BoxFuture, FutureExt};
use serde::Serialize;
use thiserror::Error;

/// Multipart parsing failure.
#[derive(Debug, Error)]
pub enum FormParseError {
    /// The request is not a well-formed multipart request.
    #[error("rejected multipart request: {0}")]
    Rejected(#[from] MultipartRejection),

    /// A part could not be read.
    #[error("malformed multipart field: {0}")]
    Field(#[from] MultipartError),
}

/// Metadata of one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub original_filename: String,
    pub mimetype: Option<String>,
    pub size: usize,
}

/// Parsed form: every field name maps to all of its values, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormData {
    pub fields: BTreeMap<String, Vec<String>>,
    pub files: BTreeMap<String, Vec<FileInfo>>,
}

/// Turns a multipart request into `{fields, files}`.
pub trait FormParser: Send + Sync + 'static {
    fn parse(&self, request: Request) -> BoxFuture<'static, Result<FormData, FormParseError>>;
}

/// [`FormParser`] backed by axum's multipart extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultipartParser;

impl FormParser for MultipartParser {
    fn parse(&self, request: Request) -> BoxFuture<'static, Result<FormData, FormParseError>> {
        async move {
            let mut multipart = Multipart::from_request(request, &()).await?;
            let mut form = FormData::default();

            while let Some(field) = multipart.next_field().await? {
                let name = field.name().unwrap_or_default().to_string();
                let file_name = field.file_name().map(str::to_string);
                let mimetype = field.content_type().map(str::to_string);

                match file_name {
                    Some(original_filename) => {
                        let size = field.bytes().await?.len();
                        form.files.entry(name).or_default().push(FileInfo {
                            original_filename,
                            mimetype,
                            size,
                        });
                    }
                    None => {
                        let value = field.text().await?;
                        form.fields.entry(name).or_default().push(value);
                    }
                }
            }

            Ok(form)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::header::CONTENT_TYPE;

    fn multipart_request(body: &'static str) -> Request {
        axum::http::Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "multipart/form-data; boundary=XYZ")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn collects_fields_and_files() {
        let body = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"tag\"\r\n\r\n\
            one\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"tag\"\r\n\r\n\
            two\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            hello\r\n\
            --XYZ--\r\n";

        let form = MultipartParser.parse(multipart_request(body)).await.unwrap();

        assert_eq!(form.fields["tag"], vec!["one".to_string(), "two".to_string()]);
        assert_eq!(
            form.files["upload"],
            vec![FileInfo {
                original_filename: "a.txt".to_string(),
                mimetype: Some("text/plain".to_string()),
                size: 5,
            }]
        );
    }

    #[tokio::test]
    async fn non_multipart_requests_are_rejected() {
        let request = axum::http::Request::builder()
            .method("POST")
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::from("nope"))
            .unwrap();

        let err = MultipartParser.parse(request).await.unwrap_err();
        assert!(matches!(err, FormParseError::Rejected(_)));
    }

    #[tokio::test]
    async fn truncated_bodies_fail_on_the_field() {
        let body = "--XYZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nunterminated";
        let err = MultipartParser.parse(multipart_request(body)).await.unwrap_err();
        assert!(matches!(err, FormParseError::Field(_)));
    }
}
