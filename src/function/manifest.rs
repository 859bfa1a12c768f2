//! Compile-time metadata describing where an edge function is mounted.
//!
//! The `#[edge_function]` macro emits one of these per function; the dev
//! server uses it to register the function under its path.

use serde::Serialize;

/// Route metadata for an edge function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FunctionManifest {
    /// Unique identifier for the function.
    pub id: &'static str,
    /// HTTP method the function is documented for. Informational only: edge
    /// functions see every verb and apply their own method gate.
    pub method: &'static str,
    /// Path the function is mounted at.
    pub path: &'static str,
    /// Optional description of the function.
    pub description: &'static str,
}

impl FunctionManifest {
    pub const fn new(id: &'static str, method: &'static str, path: &'static str) -> Self {
        Self {
            id,
            method,
            path,
            description: "",
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }
}
