//! The `rts-test` edge function: validates the request, spins up a flag
//! client for it, reports the user's qualified segments and tears the client
//! down again.

use super::error::RtsError;
use super::manager::ClientManager;
use super::response;
use super::service::{SegmentProcessor, SegmentService};
use super::types::{ResponseMetadata, RtsRequest, SegmentReport};
use super::validator::RequestValidator;
use crate::backend::{ClientConfig, ClientFactory, FlagClient};
use crate::function::{EdgeError, EdgeFunction, FunctionContext, FunctionManifest};
use crate::http::{EdgeRequest, EdgeResponse, Method, StatusCode};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{error, info, warn};

pub const RTS_PATH: &str = "/api/rts-test";

pub static RTS_MANIFEST: FunctionManifest = FunctionManifest::new("rts-test", "POST", RTS_PATH)
    .with_description("Fetch qualified segments and optionally decide a flag for a user");

pub const CONTEXT_FAILED: &str = "Failed to create user context";
pub const UNKNOWN_ERROR: &str = "Unknown error occurred";

#[derive(Clone)]
pub struct RtsFunction {
    validator: RequestValidator,
    factory: Arc<dyn ClientFactory>,
    processor: Arc<dyn SegmentProcessor>,
    client_config: ClientConfig,
}

impl RtsFunction {
    pub fn new(validator: RequestValidator, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            validator,
            factory,
            processor: Arc::new(SegmentService),
            client_config: ClientConfig::default(),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn SegmentProcessor>) -> Self {
        self.processor = processor;
        self
    }

    /// Template for every client; the access key is filled in per request.
    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = config;
        self
    }

    pub fn manifest() -> &'static FunctionManifest {
        &RTS_MANIFEST
    }

    /// Client and segment stage for a request that already passed validation.
    async fn run(&self, rts_request: RtsRequest, access_key: String) -> EdgeResponse {
        let metadata = ResponseMetadata::for_request(&rts_request);
        let config = self.client_config.clone().with_access_key(access_key);
        let mut manager = ClientManager::new(self.factory.clone());

        let client = match manager.initialize(&config).await {
            Ok(client) => client,
            Err(e) => {
                error!("Client initialization failed: {}", e);
                return internal_error(&e, metadata);
            }
        };

        let outcome = self.evaluate(client.as_ref(), &rts_request).await;
        manager.close();

        match outcome {
            Ok(report) => {
                info!(
                    user_id = %rts_request.user_id,
                    segments = report.qualified_segments.len(),
                    "Request completed"
                );
                response::success(report)
            }
            Err(e) => {
                error!("Request failed: {}", e);
                internal_error(&e, metadata)
            }
        }
    }

    async fn evaluate(
        &self,
        client: &dyn FlagClient,
        request: &RtsRequest,
    ) -> Result<SegmentReport, RtsError> {
        let user_context = match client.create_user_context(&request.user_id, &request.attributes)
        {
            Ok(Some(context)) => context,
            Ok(None) => return Err(RtsError::Context(CONTEXT_FAILED.to_string())),
            Err(e) => {
                warn!("User context creation failed: {}", e);
                return Err(RtsError::Context(CONTEXT_FAILED.to_string()));
            }
        };

        self.processor
            .process_user_segments(user_context.as_ref(), request)
            .await
    }
}

fn internal_error(err: &RtsError, metadata: ResponseMetadata) -> EdgeResponse {
    response::error(
        err.to_string(),
        StatusCode::INTERNAL_SERVER_ERROR,
        Some(metadata),
    )
}

/// Message carried by a panic, if it is a string.
fn panic_message(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        Err(_) => UNKNOWN_ERROR.to_string(),
    }
}

#[async_trait]
impl EdgeFunction for RtsFunction {
    async fn fetch(
        &self,
        request: EdgeRequest,
        ctx: &FunctionContext,
    ) -> Result<EdgeResponse, EdgeError> {
        match request.method {
            Method::Options => return Ok(response::cors_preflight()),
            Method::Post => {}
            _ => return Ok(response::method_not_allowed()),
        }

        let rts_request = match self.validator.parse_and_validate(&request) {
            Ok(rts_request) => rts_request,
            Err(e) => {
                warn!("Rejected request: {}", e);
                return Ok(response::validation_error(e.to_string()));
            }
        };

        let access_key = match self.validator.resolve_access_key(&rts_request) {
            Ok(key) => key,
            Err(e) => return Ok(response::validation_error(e.to_string())),
        };

        let function = self.clone();
        let pending = rts_request.clone();
        match tokio::spawn(async move { function.run(pending, access_key).await }).await {
            Ok(response) => Ok(response),
            Err(e) => {
                let message = panic_message(e);
                error!(request_id = %ctx.request_id, "RTS request crashed: {}", message);
                Ok(response::error(
                    message,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some(ResponseMetadata::for_request(&rts_request)),
                ))
            }
        }
    }

    fn name(&self) -> &str {
        RTS_MANIFEST.id
    }
}
