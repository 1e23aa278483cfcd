//! MCP server for Exact Online
//!
//! Exposes read-only reporting and exploration tools over accounting data.

pub mod protocol;
mod server;

pub use protocol::*;
pub use server::ExactMcpServer;
