//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The file path defaults to `config.yaml` but can be specified via
//! the `-f` flag or the `BOARDCTL_CONFIG` environment variable.
//!
//! Sources are merged in order (later overrides earlier):
//!
//! 1. **YAML config file** - base configuration
//! 2. **Environment variables** - `BOARDCTL_`-prefixed, nested values via
//!    double underscores (e.g. `BOARDCTL_ANALYSIS__MAX_PROPOSALS=3`)
//! 3. **DATABASE_URL** - special case: overrides `database.url` if set
//!
//! ```bash
//! # Override the server port
//! BOARDCTL_PORT=8080
//!
//! # Point at a different database file
//! DATABASE_URL="sqlite://data/boardctl.db"
//!
//! # Change the analyzer staleness window
//! BOARDCTL_ANALYSIS__STALE_AFTER=30m
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "BOARDCTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// Loaded from YAML and environment variables; every field has a sensible
/// default so an empty file is a valid deployment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Special case: DATABASE_URL environment override, folded into
    /// `database.url` during load
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Email address of the admin user ensured at startup
    pub admin_email: String,
    /// Request identity configuration
    pub auth: AuthConfig,
    /// Analyzer backend configuration
    pub analysis: AnalysisConfig,
    /// Optional deployment quota defaults applied at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quotas: Option<QuotaDefaultsSeedConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            database: DatabaseConfig::default(),
            admin_email: "admin@localhost".to_string(),
            auth: AuthConfig::default(),
            analysis: AnalysisConfig::default(),
            quotas: None,
        }
    }
}

/// SQLite connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection string, e.g. "sqlite://boardctl.db". The file is created if
    /// it does not exist.
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://boardctl.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Proxy header identity configuration.
///
/// The service expects to run behind a trusted fronting proxy (for example
/// oauth2-proxy or vouch) that authenticates callers and injects their email
/// address in an HTTP header.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// The name of the HTTP header carrying the caller's email. Make sure all
    /// distinct users have unique email addresses at the proxy.
    pub header_name: String,
    /// Automatically create a user row on first sight of an unknown email.
    pub auto_create_users: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header_name: "x-boardctl-user".to_string(),
            auto_create_users: true,
        }
    }
}

/// Analysis backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// OpenAI-compatible endpoint to send analysis requests to. When absent,
    /// submissions are rejected as service-unavailable before any quota or
    /// state is touched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<AnalyzerEndpointConfig>,
    /// Upper bound on card proposals kept from one analysis
    pub max_proposals: usize,
    /// How long a PROCESSING report may sit before the next submission is
    /// allowed to fail it and take over
    #[serde(with = "humantime_serde")]
    pub stale_after: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_proposals: 5,
            stale_after: Duration::from_secs(600),
        }
    }
}

/// Connection details for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzerEndpointConfig {
    /// Base URL of the endpoint, e.g. "https://api.openai.com/v1/"
    pub base_url: Url,
    /// Bearer token sent with each request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model name passed through to the backend
    pub model: String,
    /// Per-request timeout
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Deployment quota defaults written to the defaults row at startup.
///
/// Absent fields keep whatever the deployment already has (or the built-in
/// constants). A value of 0 means unlimited.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaDefaultsSeedConfig {
    pub card_creation_limit: Option<i64>,
    pub evaluation_limit: Option<i64>,
    pub report_analysis_limit: Option<i64>,
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        if self.admin_email.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: admin_email must not be empty".to_string(),
            });
        }

        if self.auth.header_name.trim().is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: auth.header_name must not be empty".to_string(),
            });
        }

        if self.analysis.max_proposals == 0 {
            return Err(Error::Internal {
                operation: "Config validation: analysis.max_proposals must be at least 1"
                    .to_string(),
            });
        }

        if self.analysis.stale_after.as_secs() == 0 {
            return Err(Error::Internal {
                operation: "Config validation: analysis.stale_after must be a positive duration"
                    .to_string(),
            });
        }

        if !self.database.url.starts_with("sqlite:") {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: database.url must be a sqlite connection string, got '{}'",
                    self.database.url
                ),
            });
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("BOARDCTL_").split("__"))
            // Common DATABASE_URL pattern
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
