//! Qualified segments and the optional flag decision for one user.

use super::error::RtsError;
use super::types::{FlagResult, ResponseMetadata, RtsRequest, SegmentReport};
use crate::backend::{QualifiedSegments, SegmentOption, UserContext};
use async_trait::async_trait;
use tracing::{info, warn};

#[async_trait]
pub trait SegmentProcessor: Send + Sync {
    async fn process_user_segments(
        &self,
        user_context: &dyn UserContext,
        request: &RtsRequest,
    ) -> Result<SegmentReport, RtsError>;
}

/// Fetches segments bypassing the cache, then decides the requested flag.
/// Neither step can fail the report.
#[derive(Debug, Default, Clone)]
pub struct SegmentService;

#[async_trait]
impl SegmentProcessor for SegmentService {
    async fn process_user_segments(
        &self,
        user_context: &dyn UserContext,
        request: &RtsRequest,
    ) -> Result<SegmentReport, RtsError> {
        let qualified_segments =
            match QualifiedSegments::new(user_context, &[SegmentOption::IgnoreCache])
                .fetch()
                .await
            {
                Ok(segments) => {
                    info!("Qualified segments fetched successfully: {}", segments.len());
                    segments
                }
                Err(e) => {
                    warn!("Error while fetching qualified segments: {}", e);
                    Vec::new()
                }
            };

        let mut metadata = ResponseMetadata::for_request(request);

        if let Some(flag_key) = &request.flag_key {
            metadata.flag_key = Some(flag_key.clone());
            match user_context.decide(flag_key) {
                Ok(decision) => {
                    metadata.flag_result = Some(FlagResult {
                        variation_key: decision.variation_key.unwrap_or_else(|| "null".to_string()),
                        enabled: decision.enabled,
                        reasons: decision.reasons,
                    });
                }
                Err(e) => warn!("Flag evaluation failed for '{}': {}", flag_key, e),
            }
        }

        Ok(SegmentReport {
            qualified_segments,
            metadata,
        })
    }
}
