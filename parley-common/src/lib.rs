//! Parley Common - shared foundations for the Parley agent workspace.
//!
//! Provides:
//! - Unified error taxonomy ([`Error`], [`Result`])
//! - Agent configuration with range validation ([`config::AgentConfig`])
//! - Structured logging setup ([`logging::init_logging`])
//! - Input validation and sanitization ([`validation`])

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::AgentConfig;
pub use error::{Error, PluginOp, Result};
