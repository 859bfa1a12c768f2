//! The feature-flag backend as seen by the edge functions.
//!
//! The traits here are the whole surface the request pipeline relies on:
//! a [`ClientFactory`] builds a [`FlagClient`] wired to a [`RequestHandler`],
//! the client becomes ready, hands out [`UserContext`]s and is closed again.
//! [`DatafileClientFactory`] is the bundled implementation.

pub mod client;
pub mod datafile;
pub mod events;
pub mod odp;
pub mod segments;
pub mod transport;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub use client::{DatafileClient, DatafileClientFactory};
pub use segments::{QualifiedSegments, SegmentError, SegmentFetch, SegmentOption};
pub use transport::{
    AbortableRequest, CancelScope, HttpResponse, ReqwestRequestHandler, RequestHandler,
    TransportError,
};

/// User attributes as received in the request body.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("access key is empty")]
    MissingAccessKey,
    #[error("datafile request failed with status {0}")]
    DatafileStatus(u16),
    #[error("invalid datafile: {0}")]
    InvalidDatafile(#[source] serde_json::Error),
    #[error("segment query failed: {0}")]
    Segments(String),
    #[error("client is not ready")]
    NotReady,
    #[error("client is closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// Outcome of a flag decision. Missing pieces fall back to "no variation",
/// disabled and no reasons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    pub variation_key: Option<String>,
    pub enabled: bool,
    pub reasons: Vec<String>,
}

/// Settings for one short-lived flag client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub access_key: String,
    /// Upper bound on the wait for the initial configuration.
    pub ready_timeout: Duration,
    /// Refresh interval for the configuration. `None` disables polling so the
    /// client never outlives the request that created it.
    pub update_interval: Option<Duration>,
    /// Decisions queued before events are flushed.
    pub event_batch_size: usize,
    /// Timeout for each outbound request.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(access_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            ..Self::default()
        }
    }

    pub fn with_access_key(mut self, access_key: impl Into<String>) -> Self {
        self.access_key = access_key.into();
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = Some(interval);
        self
    }

    pub fn with_event_batch_size(mut self, size: usize) -> Self {
        self.event_batch_size = size.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            update_interval: None,
            event_batch_size: 1,
            request_timeout: transport::DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// A user bound to a ready client.
#[async_trait]
pub trait UserContext: Send + Sync {
    /// Ask the backend which segments the user qualifies for. Depending on the
    /// implementation the answer is either a success flag, with the segments
    /// readable from [`UserContext::qualified_segments`] afterwards, or the
    /// list itself.
    async fn fetch_qualified_segments(
        &self,
        options: &[SegmentOption],
    ) -> Result<SegmentFetch, BackendError>;

    /// Segments stored by the last successful fetch.
    fn qualified_segments(&self) -> Option<Vec<String>>;

    fn decide(&self, flag_key: &str) -> Result<Decision, BackendError>;
}

/// An initialized backend client.
#[async_trait]
pub trait FlagClient: Send + Sync {
    /// Resolves once the client has its configuration.
    async fn on_ready(&self) -> Result<(), BackendError>;

    /// Bind a user to the client. `Ok(None)` means the client refused the user.
    fn create_user_context(
        &self,
        user_id: &str,
        attributes: &Attributes,
    ) -> Result<Option<Box<dyn UserContext>>, BackendError>;

    /// Release the client. Called once per client.
    fn close(&self) -> Result<(), BackendError>;
}

/// Builds flag clients whose network calls go through `requests`.
pub trait ClientFactory: Send + Sync {
    fn create(
        &self,
        config: &ClientConfig,
        requests: Arc<dyn RequestHandler>,
    ) -> Result<Arc<dyn FlagClient>, BackendError>;
}
