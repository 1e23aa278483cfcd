//! Error types for the Exact Online MCP server
//!
//! Every error carries a human-readable message and a suggested next action.
//! At the tool boundary errors are converted to structured JSON payloads via
//! [`ExactError::to_json`] instead of being surfaced as protocol faults.

use serde_json::{json, Value};
use thiserror::Error;

/// Errors raised by the Exact Online client and tool layer
#[derive(Error, Debug)]
pub enum ExactError {
    #[error("{message}")]
    Authentication { message: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after: u64 },

    #[error("Division {division} is not accessible")]
    DivisionNotAccessible { division: i64 },

    #[error("Endpoint '{endpoint}' not found")]
    EndpointNotFound { endpoint: String },

    #[error("{message}")]
    Network {
        message: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{0}")]
    Api(String),

    #[error("{message}")]
    InvalidInput { message: String, action: String },
}

impl ExactError {
    pub fn authentication() -> Self {
        Self::Authentication {
            message: "Authentication required".to_string(),
        }
    }

    pub fn invalid_input(message: impl Into<String>, action: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            action: action.into(),
        }
    }

    /// Suggested next action for the caller
    pub fn action(&self) -> String {
        match self {
            Self::Authentication { .. } => {
                "Run 'exactonline-mcp --authorize' to authenticate".to_string()
            }
            Self::RateLimited { retry_after } => {
                format!("Please wait {} seconds before retrying", retry_after)
            }
            Self::DivisionNotAccessible { .. } => {
                "Use list_divisions to see available divisions".to_string()
            }
            Self::EndpointNotFound { .. } => {
                "Use list_endpoints to see available endpoints".to_string()
            }
            Self::Network { .. } => "Check your network connection and try again".to_string(),
            Self::Api(_) => "Check server logs for details".to_string(),
            Self::InvalidInput { action, .. } => action.clone(),
        }
    }

    /// Structured error payload returned to the MCP caller
    pub fn to_json(&self) -> Value {
        let mut payload = json!({
            "error": self.to_string(),
            "action": self.action(),
        });
        if let Self::RateLimited { retry_after } = self {
            payload["retry_after"] = json!(retry_after);
        }
        payload
    }
}
