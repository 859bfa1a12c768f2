//! Decision events, batched in memory and handed to a dispatcher.

use super::BackendError;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpressionEvent {
    pub user_id: String,
    pub flag_key: String,
    pub variation_key: Option<String>,
    pub enabled: bool,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl ImpressionEvent {
    pub fn now(
        user_id: impl Into<String>,
        flag_key: impl Into<String>,
        variation_key: Option<String>,
        enabled: bool,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            flag_key: flag_key.into(),
            variation_key,
            enabled,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, batch: &[ImpressionEvent]) -> Result<(), BackendError>;
}

/// Dispatcher that only logs the batch.
#[derive(Debug, Default, Clone)]
pub struct LogDispatcher;

impl EventDispatcher for LogDispatcher {
    fn dispatch(&self, batch: &[ImpressionEvent]) -> Result<(), BackendError> {
        let payload = serde_json::to_string(batch).map_err(|e| BackendError::Other(e.to_string()))?;
        debug!(events = batch.len(), "Sending events: {}", payload);
        Ok(())
    }
}

/// Queues events and dispatches them once `batch_size` are waiting.
pub struct BatchEventProcessor {
    batch_size: usize,
    queue: Mutex<Vec<ImpressionEvent>>,
    dispatcher: Arc<dyn EventDispatcher>,
}

impl BatchEventProcessor {
    pub fn new(batch_size: usize, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self {
            batch_size: batch_size.max(1),
            queue: Mutex::new(Vec::new()),
            dispatcher,
        }
    }

    pub fn process(&self, event: ImpressionEvent) {
        let full = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            queue.push(event);
            queue.len() >= self.batch_size
        };
        if full {
            self.flush();
        }
    }

    /// Dispatch whatever is queued. Dispatch failures drop the batch.
    pub fn flush(&self) {
        let batch = std::mem::take(&mut *self.queue.lock().unwrap_or_else(PoisonError::into_inner));
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.dispatcher.dispatch(&batch) {
            warn!("Dropping {} events: {}", batch.len(), e);
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
