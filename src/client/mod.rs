//! Access to the Apigee management API.
//!
//! [`Transport`] performs one authenticated request and hands back the
//! response body or an [`ApiError`] carrying the HTTP status. [`HttpTransport`]
//! is the real implementation; tests substitute a scripted one.
//! [`ApigeeClient`] layers the organization, the backend flavor and the
//! JSON/form/multipart codecs on top.

mod error;
mod http;

pub use error::ApiError;
pub use http::HttpTransport;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Backend;
use crate::error::ProviderError;

/// Content type of form-encoded bodies.
pub const FORM_ENCODED: &str = "application/x-www-form-urlencoded";

/// Content type of JSON bodies.
pub const APPLICATION_JSON: &str = "application/json";

/// Content type of XML bodies.
pub const APPLICATION_XML: &str = "application/xml";

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    /// A plain form field.
    Text {
        /// Field name.
        name: String,
        /// Field value.
        value: String,
    },
    /// A file upload.
    File {
        /// Field name.
        name: String,
        /// File name sent to the server.
        filename: String,
        /// File contents.
        bytes: Bytes,
    },
}

/// Named byte blobs plus form fields, sent as `multipart/form-data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    parts: Vec<Part>,
}

impl MultipartForm {
    /// An empty form.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text field.
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Add a file.
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(Part::File {
            name: name.into(),
            filename: filename.into(),
            bytes: bytes.into(),
        });
        self
    }

    /// Read a local file into a new part.
    pub async fn file_from_path(
        self,
        name: impl Into<String>,
        path: &str,
    ) -> Result<Self, ProviderError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(self.file(name, file_name(path), bytes))
    }

    /// The parts in insertion order.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Names of all parts, in order.
    pub fn names(&self) -> Vec<&str> {
        self.parts
            .iter()
            .map(|p| match p {
                Part::Text { name, .. } | Part::File { name, .. } => name.as_str(),
            })
            .collect()
    }
}

/// The body of an [`ApiRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// A JSON document.
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` fields.
    Form(Vec<(String, String)>),
    /// `multipart/form-data` parts.
    Multipart(MultipartForm),
    /// Raw bytes with an explicit content type.
    Raw {
        /// Content type header value.
        content_type: String,
        /// The body.
        bytes: Bytes,
    },
}

/// One call to the management API.
///
/// `path` is relative to the management base URL, e.g.
/// `organizations/acme/apis/orders-api`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the base URL.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
}

impl ApiRequest {
    /// A request without query, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// `GET path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path`.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// `PUT path`.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// `DELETE path`.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the body.
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Value of a form field in the body, if the body is a form.
    pub fn form_field(&self, key: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// Performs one authenticated HTTP request against the management API.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send the request; non-2xx responses come back as [`ApiError::Status`].
    async fn send(&self, request: ApiRequest) -> Result<Bytes, ApiError>;
}

/// The management API as seen by resource handlers.
#[derive(Clone)]
pub struct ApigeeClient {
    transport: Arc<dyn Transport>,
    organization: String,
    backend: Backend,
}

impl std::fmt::Debug for ApigeeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApigeeClient")
            .field("organization", &self.organization)
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl ApigeeClient {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn Transport>, organization: impl Into<String>, backend: Backend) -> Self {
        Self {
            transport,
            organization: organization.into(),
            backend,
        }
    }

    /// The organization every path is rooted at.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// The configured backend flavor.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// `organizations/{org}/` followed by the escaped segments joined with `/`.
    pub fn org_path(&self, segments: &[&str]) -> String {
        let mut path = format!("organizations/{}", urlencoding::encode(&self.organization));
        for segment in segments {
            path.push('/');
            path.push_str(&urlencoding::encode(segment));
        }
        path
    }

    /// Send a raw request.
    pub async fn send(&self, request: ApiRequest) -> Result<Bytes, ApiError> {
        self.transport.send(request).await
    }

    /// `GET path`, decoding the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: String) -> Result<T, ProviderError> {
        let body = self.send(ApiRequest::get(path)).await?;
        decode(&body)
    }

    /// Send `value` as a JSON body and decode the JSON response.
    pub async fn send_json<B, T>(&self, method: Method, path: String, value: &B) -> Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = ApiRequest::new(method, path).body(RequestBody::Json(serde_json::to_value(value)?));
        let body = self.send(request).await?;
        decode(&body)
    }

    /// Send `value` as a JSON body, ignoring the response.
    pub async fn send_json_unit<B>(&self, method: Method, path: String, value: &B) -> Result<(), ProviderError>
    where
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::new(method, path).body(RequestBody::Json(serde_json::to_value(value)?));
        self.send(request).await?;
        Ok(())
    }

    /// Send form-encoded `fields`, returning the raw response body.
    pub async fn send_form(
        &self,
        method: Method,
        path: String,
        fields: Vec<(String, String)>,
    ) -> Result<Bytes, ApiError> {
        self.send(ApiRequest::new(method, path).body(RequestBody::Form(fields)))
            .await
    }

    /// Upload `form` with the method, path and query of `request`, decoding
    /// the JSON response.
    pub async fn send_multipart<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        form: MultipartForm,
    ) -> Result<T, ProviderError> {
        let body = self.send(request.body(RequestBody::Multipart(form))).await?;
        decode(&body)
    }

    /// `DELETE path`, ignoring the response body.
    pub async fn delete(&self, path: String) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(path)).await.map(|_| ())
    }
}

/// Decode a JSON response body. An empty body decodes as JSON `null`.
pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProviderError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_value(serde_json::Value::Null)?);
    }
    Ok(serde_json::from_slice(body)?)
}

fn file_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
