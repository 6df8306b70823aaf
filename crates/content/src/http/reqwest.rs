//! [`HttpClient`] backed by reqwest.

use super::{Body, HttpClient, Request, Response, parse_body};
use crate::error::{ErrorKind, Result};
use ::reqwest::header::{CONTENT_TYPE, HeaderMap};
use ::reqwest::{Client, RequestBuilder};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const USER_AGENT: &str = concat!("cairn/", env!("CARGO_PKG_VERSION"));

#[derive(Clone, Debug)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .gzip(true)
            .build()
            .or_raise(|| ErrorKind::Network("failed to build HTTP client".to_string()))?;
        Ok(Self { client })
    }

    fn prepare(&self, builder: RequestBuilder, request: &Request) -> RequestBuilder {
        let mut builder = builder;
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(credentials) = &request.credentials {
            builder = builder.basic_auth(&credentials.username, Some(&credentials.password));
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder, url: &str) -> Result<::reqwest::Response> {
        let response = builder.send().await.or_raise(|| ErrorKind::Network(url.to_string()))?;
        tracing::debug!(url, status = response.status().as_u16(), "HTTP response");
        Ok(response)
    }

    async fn into_response(response: ::reqwest::Response, url: &str) -> Result<Response> {
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let content_type = response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
        let bytes = response.bytes().await.or_raise(|| ErrorKind::Network(url.to_string()))?;
        Ok(Response { status, headers, body: parse_body(content_type.as_deref(), bytes.to_vec()) })
    }
}

fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, request: Request) -> Result<Response> {
        let builder = self.prepare(self.client.get(&request.url).query(&request.params), &request);
        let response = self.send(builder, &request.url).await?;
        Self::into_response(response, &request.url).await
    }

    async fn post(&self, request: Request) -> Result<Response> {
        let builder = self.prepare(self.client.post(&request.url).form(&request.params), &request);
        let response = self.send(builder, &request.url).await?;
        Self::into_response(response, &request.url).await
    }

    async fn get_file(&self, request: Request, staging: &Path) -> Result<Response> {
        let builder = self.prepare(self.client.get(&request.url).query(&request.params), &request);
        let mut response = self.send(builder, &request.url).await?;
        if !response.status().is_success() || response.status().as_u16() == super::STATUS_NO_CONTENT {
            return Self::into_response(response, &request.url).await;
        }
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());

        tokio::fs::create_dir_all(staging).await.or_raise(|| ErrorKind::Storage)?;
        let temp = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(staging)
            .or_raise(|| ErrorKind::Storage)?
            .into_temp_path();
        let mut file = tokio::fs::File::create(&temp).await.or_raise(|| ErrorKind::Storage)?;
        while let Some(chunk) = response.chunk().await.or_raise(|| ErrorKind::Network(request.url.clone()))? {
            file.write_all(&chunk).await.or_raise(|| ErrorKind::Storage)?;
        }
        file.flush().await.or_raise(|| ErrorKind::Storage)?;
        Ok(Response { status, headers, body: Body::File(temp) })
    }
}
