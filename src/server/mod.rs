//! Server module
//!
//! HTTP receiver and its startup/shutdown plumbing.

pub mod http;
pub mod startup;

pub use http::{create_router, AppState, RequestError};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};
