//! hookrelay webhook receiver library
//!
//! Authenticates GitHub webhook deliveries (source address allow-list and
//! `X-Hub-Signature`), extracts repository/branch metadata and runs the
//! matching local hook scripts.

pub mod cli;
pub mod config;
pub mod hooks;
pub mod logging;
pub mod server;
