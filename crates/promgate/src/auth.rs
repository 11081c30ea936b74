//! OIDC authentication.
//!
//! Validates bearer tokens against the configured OIDC realm and extracts the
//! custom claims the resolver needs (`roles`, `email`).
//!
//! # Token sources
//!
//! The raw access token is taken from request headers in preference order:
//! 1. `Authorization` (with the `Bearer ` prefix stripped)
//! 2. `X-Forwarded-Access-Token`
//! 3. `X-Auth-Request-Access-Token`
//!
//! The forwarded-token headers cover deployments where an auth proxy such as
//! oauth2-proxy sits in front and passes the upstream token along.
//!
//! # Key management
//!
//! Signing keys are discovered through the realm's
//! `/.well-known/openid-configuration` document and cached by `kid`; the
//! cache is refreshed on an interval. Issuer, audience and expiry are
//! validated during decode.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Headers inspected for a raw access token, in preference order.
pub const TOKEN_HEADERS: [&str; 3] = [
    "Authorization",
    "X-Forwarded-Access-Token",
    "X-Auth-Request-Access-Token",
];

/// Custom claims extracted from a validated access token.
#[derive(Debug, Clone, Deserialize)]
pub struct UserClaims {
    /// Role names mapped to ACLs by the resolver.
    #[serde(default)]
    pub roles: Vec<String>,
    /// User email, used for request logging only.
    #[serde(default)]
    pub email: Option<String>,
}

/// OIDC validator configuration.
#[derive(Debug, Clone)]
pub struct OidcConfig {
    /// OIDC realm (issuer) URL.
    pub realm_url: String,
    /// Client id expected in the token audience.
    pub client_id: String,
    /// JWKS refresh interval.
    pub jwks_refresh_interval: Duration,
}

/// OIDC discovery document.
#[derive(Debug, Deserialize)]
struct OidcDiscovery {
    issuer: String,
    jwks_uri: String,
}

/// JWKS document.
#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwkKey>,
}

/// Individual JWK key.
#[derive(Debug, Deserialize)]
struct JwkKey {
    /// Key type (RSA, EC)
    kty: String,
    /// Key ID
    kid: Option<String>,
    /// RSA modulus (for RSA keys)
    n: Option<String>,
    /// RSA exponent (for RSA keys)
    e: Option<String>,
    /// EC curve (for EC keys)
    crv: Option<String>,
    /// EC x coordinate (for EC keys)
    x: Option<String>,
    /// EC y coordinate (for EC keys)
    y: Option<String>,
}

/// JWKS cache entry.
struct JwksCache {
    /// Decoding keys indexed by kid.
    keys: HashMap<String, DecodingKey>,
    /// When the cache was last refreshed.
    last_refresh: Instant,
}

/// OIDC token validator.
pub struct OidcValidator {
    config: OidcConfig,
    jwks_cache: RwLock<Option<JwksCache>>,
    http_client: reqwest::Client,
}

impl OidcValidator {
    /// Create a validator for the given realm.
    pub fn new(config: OidcConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            config,
            jwks_cache: RwLock::new(None),
            http_client,
        })
    }

    /// The validator's configuration.
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// Fetch the discovery document and JWKS eagerly.
    ///
    /// Called at startup so a misconfigured realm fails the process instead
    /// of the first request.
    pub async fn warm_up(&self) -> Result<()> {
        info!(realm = %self.config.realm_url, "connecting to OIDC backend");
        self.refresh_jwks().await
    }

    /// Validate an access token and extract its custom claims.
    pub async fn validate(&self, token: &str) -> Result<UserClaims> {
        let header = decode_header(token)?;
        let kid = header.kid.as_deref();

        debug!(kid = ?kid, alg = ?header.alg, "decoded JWT header");

        let key = self.get_decoding_key(kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.config.realm_url]);
        validation.set_audience(&[&self.config.client_id]);
        validation.validate_exp = true;

        let token_data = decode::<UserClaims>(token, &key, &validation)?;
        let claims = token_data.claims;

        debug!(email = ?claims.email, roles = ?claims.roles, "validated access token");

        Ok(claims)
    }

    /// Get a decoding key from the JWKS cache, refreshing if stale.
    async fn get_decoding_key(&self, kid: Option<&str>) -> Result<DecodingKey> {
        let needs_refresh = {
            let cache = self.jwks_cache.read().await;
            match &*cache {
                None => true,
                Some(c) => c.last_refresh.elapsed() > self.config.jwks_refresh_interval,
            }
        };

        if needs_refresh {
            self.refresh_jwks().await?;
        }

        let cache = self.jwks_cache.read().await;
        let cache = cache
            .as_ref()
            .ok_or_else(|| Error::Internal("JWKS cache empty after refresh".to_string()))?;

        // Find key by kid, or use the sole key if no kid was specified.
        let key = match kid {
            Some(kid) => cache.keys.get(kid).cloned(),
            None => cache.keys.values().next().cloned(),
        };

        key.ok_or_else(|| {
            Error::Unauthorized(format!("no matching key found in JWKS for kid: {kid:?}"))
        })
    }

    /// Refresh the JWKS from the realm.
    async fn refresh_jwks(&self) -> Result<()> {
        let discovery_url = format!(
            "{}/.well-known/openid-configuration",
            self.config.realm_url.trim_end_matches('/')
        );

        debug!(url = %discovery_url, "fetching OIDC discovery document");

        let discovery: OidcDiscovery = self
            .http_client
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("failed to fetch OIDC discovery: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Internal(format!("invalid OIDC discovery response: {e}")))?;

        if discovery.issuer != self.config.realm_url {
            return Err(Error::Config(format!(
                "issuer mismatch: expected {}, got {}",
                self.config.realm_url, discovery.issuer
            )));
        }

        debug!(url = %discovery.jwks_uri, "fetching JWKS");

        let jwks: JwksDocument = self
            .http_client
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| Error::Internal(format!("failed to fetch JWKS: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Internal(format!("invalid JWKS response: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if let Some(key) = jwk_to_decoding_key(&jwk)? {
                let kid = jwk.kid.unwrap_or_else(|| "default".to_string());
                keys.insert(kid, key);
            }
        }

        if keys.is_empty() {
            return Err(Error::Config("no usable keys found in JWKS".to_string()));
        }

        info!(key_count = keys.len(), "refreshed JWKS cache");

        let mut cache = self.jwks_cache.write().await;
        *cache = Some(JwksCache {
            keys,
            last_refresh: Instant::now(),
        });

        Ok(())
    }
}

/// Convert a JWK to a decoding key. Unsupported key types are skipped.
fn jwk_to_decoding_key(jwk: &JwkKey) -> Result<Option<DecodingKey>> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_ref()
                .ok_or_else(|| Error::Config("RSA key missing 'n'".to_string()))?;
            let e = jwk
                .e
                .as_ref()
                .ok_or_else(|| Error::Config("RSA key missing 'e'".to_string()))?;

            DecodingKey::from_rsa_components(n, e)
                .map(Some)
                .map_err(|e| Error::Config(format!("invalid RSA key: {e}")))
        }
        "EC" => {
            let crv = jwk
                .crv
                .as_ref()
                .ok_or_else(|| Error::Config("EC key missing 'crv'".to_string()))?;
            let x = jwk
                .x
                .as_ref()
                .ok_or_else(|| Error::Config("EC key missing 'x'".to_string()))?;
            let y = jwk
                .y
                .as_ref()
                .ok_or_else(|| Error::Config("EC key missing 'y'".to_string()))?;

            match crv.as_str() {
                "P-256" | "P-384" => DecodingKey::from_ec_components(x, y)
                    .map(Some)
                    .map_err(|e| Error::Config(format!("invalid EC {crv} key: {e}"))),
                _ => {
                    warn!(crv = %crv, "unsupported EC curve");
                    Ok(None)
                }
            }
        }
        kty => {
            warn!(kty = %kty, "unsupported key type");
            Ok(None)
        }
    }
}

/// Extract a raw access token from request headers.
///
/// Headers are tried in [`TOKEN_HEADERS`] order; the `Bearer ` prefix is
/// stripped from the `Authorization` header. Requests that look like they
/// come from Grafana get a more instructive error, since a missing token
/// there almost always means the data source is not forwarding identity.
pub fn extract_access_token(headers: &HeaderMap) -> Result<String> {
    for name in TOKEN_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };

        let token = if name == "Authorization" {
            value.strip_prefix("Bearer ").unwrap_or(value)
        } else {
            value
        };

        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    let is_grafana_request = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.to_lowercase().contains("grafana"));

    if is_grafana_request {
        return Err(Error::Unauthorized(
            "no bearer token found, possible causes: grafana data source is not configured \
             with Forward OAuth Identity option; grafana user sessions are not tuned to live \
             shorter than IDP sessions; malicious requests"
                .to_string(),
        ));
    }

    Err(Error::Unauthorized("no bearer token found".to_string()))
}
