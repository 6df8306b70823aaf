//! Scripted HTTP client for testing.

use super::{Body, HttpClient, Request, Response};
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use tokio::sync::Mutex;

/// A canned response.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Json(u16, Value),
    Bytes(u16, Vec<u8>),
    Status(u16),
    /// The transport fails before any response arrives.
    NetworkError,
}

/// An [`HttpClient`] that replays scripted responses per URL.
///
/// Responses for a URL are consumed in order; the last one is repeated
/// for any further requests. Requests to unscripted URLs fail as network
/// errors. Every request is recorded.
///
/// ```
/// use cairn_content::http::{HttpClient, MockClient, MockResponse, Request};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let client = MockClient::new();
/// client.respond("http://cms/updates", MockResponse::Status(401)).await;
/// let response = client.get(Request::new("http://cms/updates")).await.unwrap();
/// assert!(response.is_unauthorized());
/// # }
/// ```
#[derive(Default)]
pub struct MockClient {
    script: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    requests: Mutex<Vec<(&'static str, Request)>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn respond(&self, url: impl Into<String>, response: MockResponse) {
        self.script.lock().await.entry(url.into()).or_default().push_back(response);
    }

    /// Drop anything still scripted for `url` and script `response` alone.
    pub async fn replace(&self, url: impl Into<String>, response: MockResponse) {
        self.script.lock().await.insert(url.into(), VecDeque::from([response]));
    }

    /// Every request made so far, with its method.
    pub async fn requests(&self) -> Vec<(&'static str, Request)> {
        self.requests.lock().await.clone()
    }

    /// Requests made to `url`.
    pub async fn requests_to(&self, url: &str) -> Vec<Request> {
        self.requests.lock().await.iter().filter(|(_, r)| r.url == url).map(|(_, r)| r.clone()).collect()
    }

    async fn next(&self, method: &'static str, request: Request) -> Result<Response> {
        let url = request.url.clone();
        self.requests.lock().await.push((method, request));
        let mut script = self.script.lock().await;
        let scripted = script.get_mut(&url).and_then(|queue| match queue.len() {
            0 => None,
            1 => queue.front().cloned(),
            _ => queue.pop_front(),
        });
        Ok(match scripted {
            None | Some(MockResponse::NetworkError) => exn::bail!(ErrorKind::Network(url)),
            Some(MockResponse::Json(status, value)) => Response::new(status, Body::Json(value)),
            Some(MockResponse::Bytes(status, bytes)) => Response::new(status, Body::Bytes(bytes)),
            Some(MockResponse::Status(status)) => Response::new(status, Body::Empty),
        })
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn get(&self, request: Request) -> Result<Response> {
        self.next("GET", request).await
    }

    async fn post(&self, request: Request) -> Result<Response> {
        self.next("POST", request).await
    }

    async fn get_file(&self, request: Request, staging: &Path) -> Result<Response> {
        let mut response = self.next("GET", request).await?;
        if let Body::Bytes(bytes) = &response.body
            && response.is_success()
        {
            std::fs::create_dir_all(staging).or_raise(|| ErrorKind::Storage)?;
            let mut temp = tempfile::NamedTempFile::new_in(staging).or_raise(|| ErrorKind::Storage)?;
            temp.write_all(bytes).or_raise(|| ErrorKind::Storage)?;
            response.body = Body::File(temp.into_temp_path());
        }
        Ok(response)
    }
}
