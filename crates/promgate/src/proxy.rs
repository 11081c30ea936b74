//! Request rewriting and upstream forwarding.
//!
//! The proxy handler is the catch-all route behind the method-gate and
//! authentication middleware. It applies the safe-mode gate, rewrites the
//! metric expressions in GET query strings and url-encoded POST bodies
//! through the effective ACL, and forwards the result to the upstream
//! backend, streaming the response back.
//!
//! Paths that do not target the query API (no `/api/`, no `/federate`) and
//! requests from fullaccess users are forwarded untouched.

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Method};
use axum::response::Response;
use bytes::Bytes;
use std::net::SocketAddr;
use tracing::{debug, warn};

use promgate_acl::QueryModifier;

use crate::error::{Error, Result};
use crate::middleware::EffectiveAcl;
use crate::server::AppState;

/// Maximum buffered request body size (form bodies are small; this is a
/// safety bound, not a tuning knob).
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Headers that must not be forwarded upstream.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Handle a proxied request: gate, rewrite, forward.
pub async fn proxy_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response> {
    let path = request.uri().path().to_string();

    if state.config.safe_mode && is_unsafe_path(&path) {
        warn!(path = %path, "blocked a request to an unsafe path");
        return Err(Error::Forbidden(format!(
            "path {path} is blocked in safe mode"
        )));
    }

    let acl = request.extensions().get::<EffectiveAcl>().cloned();
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);

    let (parts, body) = request.into_parts();
    let body = to_bytes(body, MAX_BODY_SIZE)
        .await
        .map_err(|e| Error::BadQuery(format!("failed to read request body: {e}")))?;

    let (query, body) = if is_not_api_request(&path) {
        debug!(path = %path, "not an API request, request is not modified");
        (parts.uri.query().map(str::to_owned), body)
    } else {
        let EffectiveAcl(acl) = acl.ok_or(Error::AclNotSet)?;

        if acl.fullaccess {
            debug!("user has full access, request is not modified");
            (parts.uri.query().map(str::to_owned), body)
        } else {
            let modifier = QueryModifier {
                acl,
                enable_deduplication: state.config.enable_deduplication,
                optimize_expressions: state.config.optimize_expressions,
            };

            let query = match parts.uri.query() {
                Some(raw) => {
                    let rewritten = modifier.rewrite_form(raw)?;
                    debug!(params = %rewritten, "rewrote GET params");
                    Some(rewritten)
                }
                None => None,
            };

            let body = if parts.method == Method::POST && is_form_request(&parts.headers) {
                let form = std::str::from_utf8(&body)
                    .map_err(|_| Error::BadQuery("request body is not valid UTF-8".to_string()))?;
                let rewritten = modifier.rewrite_form(form)?;
                debug!(params = %rewritten, "rewrote POST params");
                Bytes::from(rewritten)
            } else {
                body
            };

            (query, body)
        }
    };

    forward(&state, parts, query, body, client_addr).await
}

/// Forward the (possibly rewritten) request upstream and stream the response
/// back to the caller.
async fn forward(
    state: &AppState,
    parts: Parts,
    query: Option<String>,
    body: Bytes,
    client_addr: Option<SocketAddr>,
) -> Result<Response> {
    let url = upstream_url(&state.upstream, parts.uri.path(), query.as_deref());

    let mut headers = parts.headers.clone();
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }

    if state.config.set_proxy_headers {
        if let Some(addr) = client_addr {
            if let Ok(value) = header::HeaderValue::from_str(&addr.to_string()) {
                headers.insert("X-Forwarded-For", value);
            }
        }
        headers.insert(
            "X-Forwarded-Proto",
            header::HeaderValue::from_static("http"),
        );
        if let Some(host) = parts.headers.get(header::HOST) {
            headers.insert("X-Forwarded-Host", host.clone());
        }
    }

    debug!(url = %url, method = %parts.method, "forwarding request upstream");

    let upstream_response = state
        .http
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let mut response = Response::builder().status(upstream_response.status());
    for (name, value) in upstream_response.headers() {
        response = response.header(name, value);
    }

    response
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .map_err(|e| Error::Internal(format!("failed to assemble response: {e}")))
}

/// Join the upstream base URL with the request path and rewritten query.
fn upstream_url(base: &reqwest::Url, path: &str, query: Option<&str>) -> reqwest::Url {
    let mut url = base.clone();
    let base_path = base.path().trim_end_matches('/');
    url.set_path(&format!("{base_path}{path}"));
    url.set_query(query.filter(|q| !q.is_empty()));
    url
}

/// Whether the path targets a potentially dangerous endpoint (TSDB admin or
/// remote write).
fn is_unsafe_path(path: &str) -> bool {
    path.contains("/admin/tsdb") || path.contains("/api/v1/write")
}

/// Whether the path targets neither the query API nor federation, in which
/// case there is nothing to rewrite.
fn is_not_api_request(path: &str) -> bool {
    !path.contains("/api/") && !path.contains("/federate")
}

/// Whether the request body is a url-encoded form.
fn is_form_request(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}
