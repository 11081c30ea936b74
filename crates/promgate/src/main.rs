//! promgate entrypoint.

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use promgate::auth::{OidcConfig, OidcValidator};
use promgate::config::Config;
use promgate::server::{self, AppState};
use promgate_acl::AclRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let default_filter = if config.debug {
        "promgate=debug,promgate_acl=debug,info"
    } else {
        "info"
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    config.validate()?;

    if config.assumed_roles {
        info!("assumed roles mode is on");
    } else {
        info!("assumed roles mode is off");
    }

    let registry = AclRegistry::load_from_file(&config.acl_path)?;
    if config.acl_path.trim().is_empty() {
        info!("ACL path is empty, no predefined roles loaded");
    }
    for (role, acl) in registry.iter() {
        info!(role = %role, rule = %acl.raw_acl, "loaded role definition");
    }

    let oidc = OidcValidator::new(OidcConfig {
        realm_url: config.oidc_realm_url.clone(),
        client_id: config.oidc_client_id.clone(),
        jwks_refresh_interval: config.jwks_refresh_interval(),
    })?;
    oidc.warm_up().await?;

    let state = AppState::new(config, registry, oidc)?;
    server::serve(state).await?;

    Ok(())
}
