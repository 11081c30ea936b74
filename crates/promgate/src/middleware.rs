//! Request middleware: method gating, authentication and access logging.
//!
//! The method gate runs before authentication, so a request with a
//! disallowed method is answered with 405 whether or not it carries a token.
//! Authentication runs on every proxied route (the health endpoint is wired
//! outside of it). It verifies the access token, resolves the token's role
//! claims into one effective ACL and attaches that ACL to the request
//! extensions for the rewrite stage to pick up. Failures never reach the
//! upstream.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, info, warn};

use promgate_acl::Acl;

use crate::auth::extract_access_token;
use crate::error::{Error, Result};
use crate::server::AppState;

/// The effective ACL attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct EffectiveAcl(pub Acl);

/// Reject every method besides GET and POST.
pub async fn method_gate(request: Request, next: Next) -> Result<Response> {
    let method = request.method();
    if method != Method::GET && method != Method::POST {
        return Err(Error::MethodNotAllowed(method.to_string()));
    }
    Ok(next.run(request).await)
}

/// Authenticate the request and attach the effective ACL to its extensions.
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = extract_access_token(request.headers())?;

    let claims = match state.oidc.validate(&token).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!(error = %e, "token verification failed");
            return Err(e);
        }
    };

    let acl = match state
        .registry
        .resolve(&claims.roles, state.config.assumed_roles)
    {
        Ok(acl) => acl,
        Err(e) => {
            warn!(email = ?claims.email, error = %e, "failed to resolve roles");
            return Err(Error::from(e));
        }
    };

    debug!(
        email = ?claims.email,
        filter = %acl.raw_acl,
        fullaccess = acl.fullaccess,
        "resolved effective ACL"
    );

    request.extensions_mut().insert(EffectiveAcl(acl));

    Ok(next.run(request).await)
}

/// Log method, URI, status and duration of every request.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "handled request"
    );

    response
}
