//! Configuration for the Exact Online MCP server
//!
//! Settings come from an optional TOML file at `~/.exactonline-mcp/config.toml`
//! with environment variable overrides (`EXACT_ONLINE_*`).

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_REDIRECT_URI: &str = "https://localhost:8080/callback";

/// Exact Online region, selecting the API base host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Nl,
    Uk,
}

impl Region {
    pub fn base_url(&self) -> &'static str {
        match self {
            Region::Nl => "https://start.exactonline.nl",
            Region::Uk => "https://start.exactonline.co.uk",
        }
    }
}

impl FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nl" => Ok(Region::Nl),
            "uk" => Ok(Region::Uk),
            other => bail!("Unsupported region: {}. Use 'nl' or 'uk'.", other),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Nl => write!(f, "nl"),
            Region::Uk => write!(f, "uk"),
        }
    }
}

/// OAuth2 application settings
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub region: Region,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
}

fn default_redirect_uri() -> String {
    DEFAULT_REDIRECT_URI.to_string()
}

/// Directory for config and token material
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".exactonline-mcp")
}

impl Config {
    /// Load configuration from the config file and environment.
    ///
    /// Environment variables always win over file values so a single
    /// installation can be pointed at another app registration without
    /// editing the file.
    pub fn load() -> Result<Self> {
        let path = data_dir().join("config.toml");

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<PartialConfig>(&raw)
                .with_context(|| format!("invalid config file {}", path.display()))?
        } else {
            PartialConfig::default()
        };

        if let Ok(v) = std::env::var("EXACT_ONLINE_CLIENT_ID") {
            config.client_id = Some(v);
        }
        if let Ok(v) = std::env::var("EXACT_ONLINE_CLIENT_SECRET") {
            config.client_secret = Some(v);
        }
        if let Ok(v) = std::env::var("EXACT_ONLINE_REGION") {
            config.region = Some(v.parse()?);
        }
        if let Ok(v) = std::env::var("EXACT_ONLINE_REDIRECT_URI") {
            config.redirect_uri = Some(v);
        }

        let client_id = match config.client_id {
            Some(v) if !v.is_empty() => v,
            _ => bail!(
                "Missing EXACT_ONLINE_CLIENT_ID. Set it in the environment or in {}",
                path.display()
            ),
        };
        let client_secret = match config.client_secret {
            Some(v) if !v.is_empty() => v,
            _ => bail!(
                "Missing EXACT_ONLINE_CLIENT_SECRET. Set it in the environment or in {}",
                path.display()
            ),
        };

        Ok(Config {
            client_id,
            client_secret,
            region: config.region.unwrap_or_default(),
            redirect_uri: config
                .redirect_uri
                .unwrap_or_else(default_redirect_uri),
        })
    }
}

/// File shape where every field is optional; merged with the environment
#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    client_id: Option<String>,
    client_secret: Option<String>,
    region: Option<Region>,
    redirect_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_base_urls() {
        assert_eq!(Region::Nl.base_url(), "https://start.exactonline.nl");
        assert_eq!(Region::Uk.base_url(), "https://start.exactonline.co.uk");
    }

    #[test]
    fn test_region_parse() {
        assert_eq!("nl".parse::<Region>().unwrap(), Region::Nl);
        assert_eq!("UK".parse::<Region>().unwrap(), Region::Uk);
        assert!("de".parse::<Region>().is_err());
    }

    #[test]
    fn test_partial_config_from_toml() {
        let parsed: PartialConfig = toml::from_str(
            r#"
            client_id = "abc"
            region = "uk"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.client_id.as_deref(), Some("abc"));
        assert_eq!(parsed.region, Some(Region::Uk));
        assert!(parsed.client_secret.is_none());
    }
}
