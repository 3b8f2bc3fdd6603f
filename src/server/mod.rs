//! HTTP server in front of the daemon.
//!
//! - [`routes`]: Response types and route handlers
//! - [`streaming`]: Chunked relay of generated fragments

pub mod routes;
pub mod streaming;
