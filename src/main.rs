//! rts-edge dev server.
//!
//! Serves `/api/rts-test` and `/api/hello` locally. Settings come from the
//! environment, optionally seeded from a `.env` file.

use rts_edge::backend::DatafileClientFactory;
use rts_edge::hello::{HelloFunction, HELLO_MANIFEST};
use rts_edge::prelude::*;
use rts_edge::rts::{KeySource, RTS_MANIFEST};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Key from the server configuration, falling back to the live environment.
struct ConfiguredKey(Option<String>);

impl KeySource for ConfiguredKey {
    fn access_key(&self) -> Option<String> {
        self.0.clone().or_else(|| EnvKeySource::default().access_key())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e.into());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.access_key().is_none() {
        tracing::warn!("OPTIMIZELY_SDK_KEY is not set; requests must carry sdkKey");
    }

    let validator = RequestValidator::new(Arc::new(ConfiguredKey(
        config.access_key().map(str::to_string),
    )));
    let factory = Arc::new(DatafileClientFactory::new(config.datafile_url.clone()));
    let rts = RtsFunction::new(validator, factory).with_client_config(
        ClientConfig::default().with_ready_timeout(config.ready_timeout),
    );

    let server = DevServer::new(config);
    server.register_manifest(&RTS_MANIFEST, Arc::new(rts)).await?;
    server
        .register_manifest(&HELLO_MANIFEST, Arc::new(HelloFunction::new()))
        .await?;

    tracing::info!("Try: curl -X POST -d '{{\"userId\":\"u1\"}}' http://localhost:8000/api/rts-test");
    server.run().await
}
