//! Runtime configuration.
//!
//! Every flag has an environment-variable twin so the proxy can be configured
//! either way in container deployments.

use std::time::Duration;

use clap::Parser;

use crate::error::{Error, Result};

/// Authenticating reverse proxy that rewrites PromQL/MetricsQL queries with
/// per-tenant namespace filters.
#[derive(Debug, Clone, Parser)]
#[command(name = "promgate", version, about, long_about = None)]
pub struct Config {
    /// Upstream Prometheus-compatible backend, e.g. http://victoria-metrics:8428
    #[arg(long, env = "UPSTREAM_URL")]
    pub upstream_url: String,

    /// OIDC realm URL used for discovery, e.g. https://auth.example.com/realms/main
    #[arg(long, env = "OIDC_REALM_URL")]
    pub oidc_realm_url: String,

    /// OIDC client id expected in the token audience
    #[arg(long, env = "OIDC_CLIENT_ID")]
    pub oidc_client_id: String,

    /// Path to the ACL YAML file; empty means no predefined roles
    #[arg(long, env = "ACL_PATH", default_value = "")]
    pub acl_path: String,

    /// Treat unknown role names as literal rule fragments
    #[arg(long, env = "ASSUMED_ROLES")]
    pub assumed_roles: bool,

    /// Leave selectors untouched when they are already at least as
    /// restrictive as the effective ACL
    #[arg(long, env = "ENABLE_DEDUPLICATION")]
    pub enable_deduplication: bool,

    /// Run the duplicate-filter elimination pass on rewritten expressions
    #[arg(long, env = "OPTIMIZE_EXPRESSIONS")]
    pub optimize_expressions: bool,

    /// Refuse admin and remote-write endpoints with 403
    #[arg(long, env = "SAFE_MODE", default_value_t = true, action = clap::ArgAction::Set)]
    pub safe_mode: bool,

    /// Inject X-Forwarded-* headers into upstream requests
    #[arg(long, env = "SET_PROXY_HEADERS")]
    pub set_proxy_headers: bool,

    /// Log every proxied request
    #[arg(long, env = "LOG_REQUESTS")]
    pub log_requests: bool,

    /// Enable debug logging (implies request logging)
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Timeout for upstream requests, in seconds
    #[arg(long, env = "UPSTREAM_TIMEOUT", default_value_t = 30)]
    pub upstream_timeout: u64,

    /// How long to wait for in-flight connections on shutdown, in seconds
    #[arg(long, env = "GRACEFUL_SHUTDOWN_TIMEOUT", default_value_t = 20)]
    pub graceful_shutdown_timeout: u64,

    /// How often to refresh the cached JWKS, in seconds
    #[arg(long, env = "JWKS_REFRESH_INTERVAL", default_value_t = 3600)]
    pub jwks_refresh_interval: u64,
}

impl Config {
    /// Check that the configuration is usable before the server starts.
    ///
    /// The proxy cannot run without at least one source of role definitions:
    /// a non-empty ACL path and/or assumed-roles mode.
    pub fn validate(&self) -> Result<()> {
        if self.acl_path.trim().is_empty() && !self.assumed_roles {
            return Err(Error::Config(
                "at least one source of roles is required: set --acl-path and/or --assumed-roles"
                    .to_string(),
            ));
        }

        self.upstream()?;

        Ok(())
    }

    /// The parsed upstream base URL.
    pub fn upstream(&self) -> Result<reqwest::Url> {
        reqwest::Url::parse(&self.upstream_url)
            .map_err(|e| Error::Config(format!("failed to parse upstream url: {e}")))
    }

    /// Timeout applied to every upstream request.
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout)
    }

    /// Bound on the connection drain during shutdown.
    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout)
    }

    /// JWKS cache refresh interval.
    pub fn jwks_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.jwks_refresh_interval)
    }
}
