//! ollama-relay: a minimal HTTP relay in front of a local Ollama daemon.
//!
//! Serves three routes (`/models`, `/generate`, `/health`) and forwards
//! generation to the daemon over one of two transports, streaming the
//! daemon's output back to the caller as it arrives:
//!   - HTTP: the daemon's `/api/tags` and `/api/generate` endpoints
//!   - Process: the daemon's `list` and `run` subcommands

pub mod config;
pub mod error;
pub mod server;
pub mod upstream;
