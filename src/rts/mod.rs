//! Real-time segments edge function.
//!
//! [`RtsFunction`] runs one request end to end: [`RequestValidator`] checks the
//! body, [`ClientManager`] owns the short-lived flag client, a
//! [`SegmentProcessor`] gathers segments and the optional flag decision and the
//! [`response`] builders turn the outcome into a CORS-enabled JSON envelope.

pub mod error;
pub mod handler;
pub mod manager;
pub mod response;
pub mod service;
pub mod types;
pub mod validator;

pub use error::RtsError;
pub use handler::{RtsFunction, RTS_MANIFEST, RTS_PATH};
pub use manager::{ClientManager, ClientState};
pub use service::{SegmentProcessor, SegmentService};
pub use types::{ApiResponse, FlagResult, ResponseMetadata, RtsRequest, SegmentReport};
pub use validator::{EnvKeySource, KeySource, RequestValidator, StaticKeySource, SDK_KEY_ENV};
