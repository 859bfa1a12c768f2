//! Qualified-segment retrieval across the two calling conventions.

use super::{BackendError, UserContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOption {
    /// Skip the segment cache for this fetch.
    IgnoreCache,
    /// Clear the segment cache before fetching.
    ResetCache,
}

/// What a user context reports back from a segment fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentFetch {
    /// Success flag; the segments are stored on the context.
    Fetched(bool),
    /// The segments themselves. `None` is treated as an empty list.
    Segments(Option<Vec<String>>),
}

#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    #[error("qualified segments were not fetched")]
    NotFetched,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Fetches qualified segments as a plain list, whichever convention the
/// context follows.
pub struct QualifiedSegments<'a> {
    context: &'a dyn UserContext,
    options: &'a [SegmentOption],
}

impl<'a> QualifiedSegments<'a> {
    pub fn new(context: &'a dyn UserContext, options: &'a [SegmentOption]) -> Self {
        Self { context, options }
    }

    pub async fn fetch(&self) -> Result<Vec<String>, SegmentError> {
        match self.context.fetch_qualified_segments(self.options).await? {
            SegmentFetch::Fetched(true) => Ok(self.context.qualified_segments().unwrap_or_default()),
            SegmentFetch::Fetched(false) => Err(SegmentError::NotFetched),
            SegmentFetch::Segments(segments) => Ok(segments.unwrap_or_default()),
        }
    }
}
