//! Fetch-like HTTP types shared by the edge functions and the dev server.

mod request;
mod response;

pub use request::{EdgeRequest, Method};
pub use response::{EdgeResponse, StatusCode};
