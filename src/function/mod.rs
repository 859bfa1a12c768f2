//! Edge function abstraction: the handler trait, its manifest and the registry
//! the dev server dispatches through.

pub mod handler;
pub mod manifest;
pub mod registry;

pub use handler::{EdgeError, EdgeFunction, FunctionContext};
pub use manifest::FunctionManifest;
pub use registry::FunctionRegistry;
