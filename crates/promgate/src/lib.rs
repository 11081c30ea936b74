//! promgate: authenticating reverse proxy for Prometheus-compatible TSDBs.
//!
//! Sits between metrics UIs (Grafana and friends) and a Prometheus-compatible
//! backend and enforces per-tenant isolation: users authenticate against an
//! OIDC realm, their role claims are mapped to namespace ACLs, and every
//! metric query is rewritten so its selectors only match allowed namespaces.
//!
//! # Architecture
//!
//! ```text
//! Grafana ──► promgate ─────────────► VictoriaMetrics / Prometheus
//!             │  auth (OIDC/JWKS)
//!             │  resolve roles → ACL
//!             │  rewrite query/match[]
//!             └─ safe-mode gate
//! ```
//!
//! # Endpoints
//!
//! - `GET /healthz` - health check, unauthenticated
//! - everything else - authenticated, rewritten where applicable, proxied
//!
//! Query semantics live in the [`promgate_acl`] crate; this crate is the HTTP
//! shell around it.

#![deny(missing_docs)]

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod proxy;
pub mod server;

pub use auth::{OidcConfig, OidcValidator, UserClaims};
pub use config::Config;
pub use error::{Error, Result};
pub use server::AppState;
