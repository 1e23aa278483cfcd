//! Exact Online MCP Library
//!
//! Model Context Protocol server exposing read-only access to Exact Online
//! accounting data: divisions, revenue reports, balance sheets, aging
//! analyses and raw endpoint exploration.

pub mod auth;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod mcp;
pub mod models;
pub mod odata;
pub mod reports;

pub use auth::OAuth2Client;
pub use config::Config;
pub use error::ExactError;
pub use odata::{ExactClient, QueryOptions};
