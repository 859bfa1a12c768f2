//! Local HTTP server hosting the edge functions.

use crate::function::{EdgeError, EdgeFunction, FunctionManifest, FunctionRegistry};
use crate::http::{EdgeRequest, EdgeResponse, Method, StatusCode};
use crate::runtime::ServerConfig;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Dev server that dispatches requests to functions by exact path.
pub struct DevServer {
    config: ServerConfig,
    registry: Arc<FunctionRegistry>,
}

impl DevServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(FunctionRegistry::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<FunctionRegistry> {
        self.registry.clone()
    }

    /// Mount a function at `path`.
    pub async fn register_function(
        &self,
        path: impl Into<String>,
        function: Arc<dyn EdgeFunction>,
    ) -> Result<(), EdgeError> {
        self.registry.register(path, function).await
    }

    /// Mount a function at the path its manifest names.
    pub async fn register_manifest(
        &self,
        manifest: &FunctionManifest,
        function: Arc<dyn EdgeFunction>,
    ) -> Result<(), EdgeError> {
        self.registry.register_manifest(manifest, function).await
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.bind_addr().parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`.
    pub async fn serve(
        self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("Dev server listening on {}", listener.local_addr()?);
        for (path, name) in self.registry.list().await {
            info!("  {} -> {}", path, name);
        }

        let registry = self.registry.clone();
        let config = Arc::new(self.config);

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);

            let registry = registry.clone();
            let config = config.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let registry = registry.clone();
                    let config = config.clone();
                    async move { handle_request(req, registry, config, remote_addr).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection: {:?}", err);
                }
            });
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum BodyError {
    #[error("Request body too large")]
    TooLarge,
    #[error("Failed to read request body: {0}")]
    Read(Box<dyn std::error::Error + Send + Sync>),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for BodyError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        if err.is::<LengthLimitError>() {
            BodyError::TooLarge
        } else {
            BodyError::Read(err)
        }
    }
}

async fn handle_request(
    req: Request<Incoming>,
    registry: Arc<FunctionRegistry>,
    config: Arc<ServerConfig>,
    remote_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path().to_string();
    let request_id = generate_request_id();

    debug!(
        "Handling request: {} {} from {} [{}]",
        req.method(),
        path,
        remote_addr,
        request_id
    );

    if config.enable_health && path == "/_health" {
        return Ok(build_response(EdgeResponse::text("OK")));
    }

    let edge_request = match convert_request(req, &path, config.max_body_size).await {
        Ok(req) => req,
        Err(e) => {
            warn!("Failed to convert request: {} [{}]", e, request_id);
            let status = match e {
                BodyError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
                BodyError::Read(_) => StatusCode::BAD_REQUEST,
            };
            return Ok(build_response(EdgeResponse::error(status, e.to_string())));
        }
    };

    match registry.execute(&path, edge_request, &request_id).await {
        Ok(response) => Ok(build_response(response)),
        Err(e) => {
            if e.code == StatusCode::NOT_FOUND.0 {
                debug!("{} [{}]", e, request_id);
            } else {
                error!("Function at '{}' failed: {} [{}]", path, e, request_id);
            }
            Ok(build_response(e.into()))
        }
    }
}

async fn convert_request(
    req: Request<Incoming>,
    path: &str,
    max_body_size: usize,
) -> Result<EdgeRequest, BodyError> {
    let method = Method::from(req.method());

    let mut headers = HashMap::new();
    for (name, value) in req.headers() {
        if let Ok(v) = value.to_str() {
            headers.insert(name.as_str().to_lowercase(), v.to_string());
        }
    }

    // Reading stops as soon as the limit is crossed.
    let body_bytes = Limited::new(req.into_body(), max_body_size)
        .collect()
        .await?
        .to_bytes();
    let body = if body_bytes.is_empty() {
        None
    } else {
        Some(body_bytes)
    };

    Ok(EdgeRequest {
        method,
        url: path.to_string(),
        headers,
        body,
    })
}

fn build_response(edge_response: EdgeResponse) -> Response<Full<Bytes>> {
    let status = hyper::StatusCode::from_u16(edge_response.status.0).unwrap_or_else(|_| {
        warn!(
            "Invalid status code {}, falling back to 500 Internal Server Error",
            edge_response.status.0
        );
        hyper::StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut builder = Response::builder().status(status);
    for (name, value) in edge_response.headers {
        builder = builder.header(name, value);
    }

    let body = edge_response.body.unwrap_or_default();
    builder.body(Full::new(body)).unwrap_or_else(|e| {
        error!("Failed to build response: {}", e);
        let mut response = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
        *response.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

/// Process-unique request id: start time in nanoseconds plus a sequence number.
fn generate_request_id() -> String {
    static SEQUENCE: AtomicU64 = AtomicU64::new(0);
    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!(
        "{:x}-{:x}",
        timestamp,
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    )
}
