//! Lifecycle of the per-request flag client.
//!
//! A [`ClientManager`] owns one client and the [`CancelScope`] every backend
//! call of that client is registered in. Closing the manager cancels whatever
//! is still outstanding and releases the client; dropping it closes it.

use super::error::RtsError;
use crate::backend::{CancelScope, ClientConfig, ClientFactory, FlagClient, ReqwestRequestHandler};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

pub struct ClientManager {
    factory: Arc<dyn ClientFactory>,
    client: Option<Arc<dyn FlagClient>>,
    scope: CancelScope,
    state: ClientState,
}

impl ClientManager {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            client: None,
            scope: CancelScope::new(),
            state: ClientState::Uninitialized,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The live client, only while the manager is ready.
    pub fn client(&self) -> Option<Arc<dyn FlagClient>> {
        match self.state {
            ClientState::Ready => self.client.clone(),
            _ => None,
        }
    }

    pub fn scope(&self) -> &CancelScope {
        &self.scope
    }

    /// Build a client and wait until it is ready, at most
    /// `config.ready_timeout`. Any failure leaves the manager closed.
    pub async fn initialize(
        &mut self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn FlagClient>, RtsError> {
        if self.state == ClientState::Ready {
            return Err(RtsError::Initialization(
                "client already initialized".to_string(),
            ));
        }
        if self.state != ClientState::Uninitialized {
            self.close();
            self.scope = CancelScope::new();
        }
        self.state = ClientState::Initializing;

        let requests = Arc::new(
            ReqwestRequestHandler::new(self.scope.clone()).with_timeout(config.request_timeout),
        );
        let client = match self.factory.create(config, requests) {
            Ok(client) => client,
            Err(e) => {
                self.close();
                return Err(RtsError::Initialization(format!(
                    "Failed to create client: {}",
                    e
                )));
            }
        };
        self.client = Some(client.clone());

        match tokio::time::timeout(config.ready_timeout, client.on_ready()).await {
            Ok(Ok(())) => {
                self.state = ClientState::Ready;
                info!("Flag client is ready");
                Ok(client)
            }
            Ok(Err(e)) => {
                self.close();
                Err(RtsError::Initialization(format!(
                    "Client failed to become ready: {}",
                    e
                )))
            }
            Err(_) => {
                self.close();
                Err(RtsError::Initialization(format!(
                    "Client did not become ready within {} ms",
                    config.ready_timeout.as_millis()
                )))
            }
        }
    }

    /// Cancel outstanding backend calls and release the client. Never fails.
    pub fn close(&mut self) {
        if self.state == ClientState::Closed {
            return;
        }
        self.state = ClientState::Closed;
        self.scope.cancel_all();

        if let Some(client) = self.client.take() {
            match catch_unwind(AssertUnwindSafe(|| client.close())) {
                Ok(Ok(())) => debug!("Flag client closed successfully"),
                Ok(Err(e)) => warn!("Error closing flag client: {}", e),
                Err(_) => warn!("Flag client panicked while closing"),
            }
        }
    }
}

impl Drop for ClientManager {
    fn drop(&mut self) {
        self.close();
    }
}
