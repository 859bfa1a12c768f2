//! # rts-edge
//!
//! Edge functions that report the audience segments a user qualifies for and,
//! optionally, a feature-flag decision for that user.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 DevServer (hyper, exact paths)               │
//! │   /api/rts-test ──► RtsFunction      /api/hello ──► hello    │
//! └──────────────────────────────────────────────────────────────┘
//!                │ one ClientManager per request
//!                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  FlagClient ──► ReqwestRequestHandler ──► CancelScope        │
//! │  (datafile, ODP segments, impression events)                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every request builds its own flag client, waits for it to become ready,
//! asks it for the user's qualified segments and closes it again. Closing
//! aborts every backend call the client still has outstanding.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rts_edge::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let server = DevServer::with_defaults();
//!     let rts = RtsFunction::new(
//!         RequestValidator::new(Arc::new(EnvKeySource::default())),
//!         Arc::new(DatafileClientFactory::default()),
//!     );
//!     server.register_manifest(RtsFunction::manifest(), Arc::new(rts)).await?;
//!     server.run().await
//! }
//! ```

extern crate self as rts_edge;

pub mod backend;
pub mod function;
pub mod hello;
pub mod http;
pub mod rts;
pub mod runtime;

pub use async_trait::async_trait;
pub use rts_edge_macro::edge_function;

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::backend::{ClientConfig, ClientFactory, DatafileClientFactory};
    pub use crate::function::{
        EdgeError, EdgeFunction, FunctionContext, FunctionManifest, FunctionRegistry,
    };
    pub use crate::http::{EdgeRequest, EdgeResponse, Method, StatusCode};
    pub use crate::rts::{EnvKeySource, RequestValidator, RtsFunction, StaticKeySource};
    pub use crate::runtime::{DevServer, ServerConfig};
    pub use async_trait::async_trait;
    pub use rts_edge_macro::edge_function;
}

pub use function::{EdgeError, EdgeFunction, FunctionContext, FunctionRegistry};
pub use http::{EdgeRequest, EdgeResponse};
pub use runtime::{DevServer, ServerConfig};
