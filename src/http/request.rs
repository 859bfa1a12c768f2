//! Inbound request type handed to edge functions.

use bytes::Bytes;
use std::collections::HashMap;

/// HTTP method of an inbound request.
///
/// Verbs outside the common set are kept verbatim in [`Method::Other`] so the
/// method gate can reject them instead of mistaking them for `GET`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Other(verb) => verb,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Method {
    fn from(verb: &str) -> Self {
        match verb {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "PATCH" => Method::Patch,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            other => Method::Other(other.to_string()),
        }
    }
}

impl From<&hyper::Method> for Method {
    fn from(method: &hyper::Method) -> Self {
        Method::from(method.as_str())
    }
}

/// Fetch-like HTTP request for edge functions.
#[derive(Debug, Clone)]
pub struct EdgeRequest {
    /// HTTP method.
    pub method: Method,
    /// Request path.
    pub url: String,
    /// HTTP headers, names lowercased.
    pub headers: HashMap<String, String>,
    /// Request body, `None` when the client sent nothing.
    pub body: Option<Bytes>,
}

impl EdgeRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Add a header to the request.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Get a header value, ignoring case.
    pub fn get_header(&self, key: &str) -> Option<&String> {
        self.headers.get(&key.to_ascii_lowercase())
    }

    /// Get the body as text if present.
    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    /// Parse the body as JSON. A missing body parses like an empty document,
    /// so it fails the same way a truncated one does.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.body {
            Some(body) => serde_json::from_slice(body),
            None => serde_json::from_slice(b""),
        }
    }
}

impl Default for EdgeRequest {
    fn default() -> Self {
        Self::new(Method::Get, "/")
    }
}
