//! Path-keyed registry of edge functions.

use crate::function::handler::{EdgeError, EdgeFunction, FunctionContext};
use crate::function::manifest::FunctionManifest;
use crate::http::{EdgeRequest, EdgeResponse};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Maps request paths to edge functions.
#[derive(Default)]
pub struct FunctionRegistry {
    routes: RwLock<HashMap<String, Arc<dyn EdgeFunction>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mount a function at `path`.
    pub async fn register(
        &self,
        path: impl Into<String>,
        function: Arc<dyn EdgeFunction>,
    ) -> Result<(), EdgeError> {
        let path = path.into();
        let mut routes = self.routes.write().await;

        if routes.contains_key(&path) {
            return Err(EdgeError::new(format!(
                "A function is already mounted at '{}'",
                path
            )));
        }

        info!("Mounted function '{}' at {}", function.name(), path);
        routes.insert(path, function);
        Ok(())
    }

    /// Mount a function at the path named by its manifest.
    pub async fn register_manifest(
        &self,
        manifest: &FunctionManifest,
        function: Arc<dyn EdgeFunction>,
    ) -> Result<(), EdgeError> {
        self.register(manifest.path, function).await
    }

    /// Run the function mounted at `path`.
    pub async fn execute(
        &self,
        path: &str,
        request: EdgeRequest,
        request_id: &str,
    ) -> Result<EdgeResponse, EdgeError> {
        let function = {
            let routes = self.routes.read().await;
            routes
                .get(path)
                .cloned()
                .ok_or_else(|| EdgeError::not_found(format!("No function mounted at '{}'", path)))?
        };

        let ctx = FunctionContext::new(function.name(), request_id);
        debug!(
            "Dispatching {} {} to '{}' [{}]",
            request.method, path, ctx.function_name, request_id
        );
        function.fetch(request, &ctx).await
    }

    /// List mounted paths with their function names, sorted by path.
    pub async fn list(&self) -> Vec<(String, String)> {
        let routes = self.routes.read().await;
        let mut mounted: Vec<_> = routes
            .iter()
            .map(|(path, function)| (path.clone(), function.name().to_string()))
            .collect();
        mounted.sort();
        mounted
    }
}
