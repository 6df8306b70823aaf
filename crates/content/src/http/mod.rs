//! HTTP client abstraction.
//!
//! The protocol only needs three round trips (GET, POST and GET-to-file),
//! so they are expressed as a small trait. A 401 is reported as a normal
//! [`Response`] status, never as an error; errors mean the transport itself
//! failed.

#[cfg(any(test, feature = "mock"))]
mod mock;
#[cfg(feature = "reqwest")]
mod reqwest;

#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockClient, MockResponse};
#[cfg(feature = "reqwest")]
pub use self::reqwest::ReqwestClient;
use crate::auth::Credentials;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tempfile::TempPath;

pub const STATUS_OK: u16 = 200;
pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// An outgoing request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Request {
    pub url: String,
    /// Query string parameters for GET, form fields for POST.
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    /// Sent as HTTP Basic authentication when present.
    pub credentials: Option<Credentials>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), ..Self::default() }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Value of the first parameter called `name`.
    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }
}

/// A response body, parsed according to its content type.
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
    /// Downloaded to a temporary file, removed when dropped.
    File(TempPath),
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl Response {
    pub fn new(status: u16, body: Body) -> Self {
        Self { status, headers: Vec::new(), body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == STATUS_UNAUTHORIZED
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, request: Request) -> Result<Response>;

    async fn post(&self, request: Request) -> Result<Response>;

    /// GET, streaming a successful body to a temporary file in `staging`.
    async fn get_file(&self, request: Request, staging: &Path) -> Result<Response>;
}

/// Parse a body the way the protocol expects, keyed off its content type.
pub(crate) fn parse_body(content_type: Option<&str>, bytes: Vec<u8>) -> Body {
    if bytes.is_empty() {
        return Body::Empty;
    }
    let mime = content_type.and_then(|ct| ct.split(';').next()).map(str::trim).unwrap_or_default();
    if (mime == "application/json" || mime.ends_with("+json"))
        && let Ok(value) = serde_json::from_slice(&bytes)
    {
        return Body::Json(value);
    }
    if mime.starts_with("text/") || mime == "application/json" {
        return match String::from_utf8(bytes) {
            Ok(text) => Body::Text(text),
            Err(err) => Body::Bytes(err.into_bytes()),
        };
    }
    Body::Bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_body() {
        assert!(matches!(parse_body(Some("application/json; charset=utf-8"), br#"{"a":1}"#.to_vec()), Body::Json(v) if v == json!({"a": 1})));
        assert!(matches!(parse_body(Some("application/json"), b"oops".to_vec()), Body::Text(t) if t == "oops"));
        assert!(matches!(parse_body(Some("text/plain"), b"hello".to_vec()), Body::Text(t) if t == "hello"));
        assert!(matches!(parse_body(None, vec![1, 2, 3]), Body::Bytes(b) if b == [1, 2, 3]));
        assert!(matches!(parse_body(Some("application/json"), Vec::new()), Body::Empty));
    }

    #[test]
    fn test_request_builder() {
        let request = Request::new("http://cms/updates").param("secure", false).param("since", "c1").header("Accept", "application/json");
        assert_eq!(request.get_param("secure"), Some("false"));
        assert_eq!(request.get_param("since"), Some("c1"));
        assert_eq!(request.get_param("group"), None);
        assert_eq!(request.headers.len(), 1);
    }
}
