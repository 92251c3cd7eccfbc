//! The HTTP request shape `RemoteStore` hands to a
//! [`crate::transport::Transport`].

use entitystore_core::Identifier;

/// HTTP method a request config may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum RequestMethod {
    /// `GET`.
    Get,
    /// `POST`.
    Post,
    /// `PUT`.
    Put,
    /// `PATCH`.
    Patch,
    /// `DELETE`.
    Delete,
}

/// A single query-parameter value.
///
/// An `Identifier` value must be substituted with the identifier's remote
/// component before the request is sent — the sync-state gate in
/// [`crate::remote_store::RemoteStore`] exists precisely to guarantee that
/// substitution always has something to work with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum QueryValue {
    /// Must be resolved to `identifier.remote()` before sending.
    Identifier(Identifier),
    /// A literal string value, or no value (a bare flag parameter).
    Value(Option<String>),
    /// A nested list of values (e.g. `?id[]=1&id[]=2`).
    Array(Vec<QueryValue>),
}

/// An HTTP request description, independent of any particular entity.
///
/// Two calls that produce an equal `RequestConfig` are the same logical
/// request for caching and in-flight-coalescing purposes — this is the key
/// [`crate::remote_store::RemoteStore`]'s response cache and coalescing map
/// are keyed on. Query-parameter ordering is preserved (and therefore part
/// of equality) since it's significant for idempotent-request caching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RequestConfig {
    /// HTTP method.
    pub method: RequestMethod,
    /// Request path, not including query string.
    pub path: String,
    /// Ordered query parameters.
    pub query: Vec<(String, QueryValue)>,
    /// Request body, already encoded. `None` for bodyless methods.
    pub body: Option<Vec<u8>>,
}

impl RequestConfig {
    /// Builds a bodyless `GET` request config.
    pub fn get(path: impl Into<String>) -> Self {
        Self { method: RequestMethod::Get, path: path.into(), query: Vec::new(), body: None }
    }

    /// Appends a query parameter, preserving insertion order.
    pub fn with_query(mut self, key: impl Into<String>, value: QueryValue) -> Self {
        self.query.push((key.into(), value));
        self
    }

    /// Sets the request body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// How an operation's endpoint is determined.
///
/// `remove`/`removeAll` reject a `DerivedFromPath` binding, since a
/// path-derived endpoint has no way to express a delete's target independent
/// of a full URL fetched for something else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointBinding {
    /// The request path is derived from the entity's own canonical path.
    /// Not valid for `remove`/`removeAll`.
    DerivedFromPath,
    /// The request path is derived from the entity type alone.
    DerivedFromEntityType,
}
