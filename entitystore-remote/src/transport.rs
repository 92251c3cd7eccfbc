//! Bridges [`RequestConfig`](crate::request::RequestConfig) to an actual
//! network call.
//!
//! A thin wrapper converting between this workspace's request/response types
//! and `reqwest`'s. Unlike a middleware-chain upstream that bridges into a
//! `Next` so a cache sits *inside* the chain, `RemoteStore` has no middleware
//! chain to sit inside, so [`Transport`] talks to `reqwest::Client` directly.

use async_trait::async_trait;
use entitystore_core::{EntityResult, EntityStoreError};

use crate::request::{QueryValue, RequestConfig, RequestMethod};

/// Raw result of sending a [`RequestConfig`], before decoding.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// Sends a fully-resolved request config and returns the raw response.
///
/// Implementations never retry — a failed [`Transport::send`] is classified
/// and, if transient, retried with backoff by the caller
/// ([`crate::remote_store::RemoteStore`]) through the durable request queue,
/// not by the transport itself.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the raw response, or an error if the
    /// request couldn't be sent at all (DNS failure, connection refused,
    /// cancellation). A non-2xx HTTP status is still `Ok` — status mapping
    /// (e.g. 404 -> empty) is the caller's job.
    async fn send(&self, request: &RequestConfig) -> EntityResult<TransportResponse>;
}

fn query_value_to_string(value: &QueryValue) -> Vec<String> {
    match value {
        QueryValue::Identifier(identifier) => identifier
            .remote()
            .map(|remote| vec![remote.to_string()])
            .unwrap_or_default(),
        QueryValue::Value(Some(value)) => vec![value.clone()],
        QueryValue::Value(None) => vec![String::new()],
        QueryValue::Array(values) => values.iter().flat_map(query_value_to_string).collect(),
    }
}

/// [`Transport`] backed by a plain `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Builds a transport issuing requests against `base_url` joined with
    /// each request config's `path`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }

    fn build_request(&self, request: &RequestConfig) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            RequestMethod::Get => self.client.get(&url),
            RequestMethod::Post => self.client.post(&url),
            RequestMethod::Put => self.client.put(&url),
            RequestMethod::Patch => self.client.patch(&url),
            RequestMethod::Delete => self.client.delete(&url),
        };

        let query: Vec<(String, String)> = request
            .query
            .iter()
            .flat_map(|(key, value)| {
                query_value_to_string(value).into_iter().map(move |v| (key.clone(), v))
            })
            .collect();
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        builder
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestConfig) -> EntityResult<TransportResponse> {
        let response = self
            .build_request(request)
            .send()
            .await
            .map_err(|error| EntityStoreError::Engine(Box::new(error)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|error| EntityStoreError::Engine(Box::new(error)))?
            .to_vec();
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitystore_core::Identifier;

    #[test]
    fn identifier_value_resolves_remote_component() {
        let id = Identifier::from_remote("widget", 42);
        assert_eq!(query_value_to_string(&QueryValue::Identifier(id)), vec!["42".to_string()]);
    }

    #[test]
    fn identifier_value_with_only_local_resolves_to_nothing() {
        let id = Identifier::from_local("widget", "L1");
        assert!(query_value_to_string(&QueryValue::Identifier(id)).is_empty());
    }

    #[test]
    fn array_flattens_nested_values() {
        let value = QueryValue::Array(vec![
            QueryValue::Value(Some("a".into())),
            QueryValue::Array(vec![QueryValue::Value(Some("b".into()))]),
        ]);
        assert_eq!(query_value_to_string(&value), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn build_request_attaches_query_and_body() {
        let transport = ReqwestTransport::new("https://example.test");
        let config = RequestConfig::get("/widgets")
            .with_query("tag", QueryValue::Value(Some("red".into())))
            .with_body(b"payload".to_vec());
        let request = transport.build_request(&config).build().unwrap();
        assert_eq!(request.url().path(), "/widgets");
        assert_eq!(request.url().query(), Some("tag=red"));
    }
}
