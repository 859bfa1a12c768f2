//! Dev server for running the edge functions locally.

mod config;
mod server;

pub use config::{ConfigError, ServerConfig};
pub use server::DevServer;
