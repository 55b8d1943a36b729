//! Reverse proxy: `ANY /proxy/{host:port}/{path...}`.
//!
//! Used when a caller cannot reach agent endpoints directly (for example
//! from outside a container network). The registry authorizes the target
//! against its own directory, forwards headers and body verbatim, and
//! streams the response back without reframing so SSE bodies pass through
//! untouched. Dropping the inbound connection drops the streamed body,
//! which cancels the outbound leg.

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use tracing::debug;

use mesh_core::error::MeshError;

use super::error::{ApiError, ApiResult};
use super::ApiContext;

/// Cap on buffered request bodies; tool-call payloads are small.
const MAX_REQUEST_BODY: usize = 16 * 1024 * 1024;

/// Hop-by-hop headers that must not be forwarded in either direction.
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "transfer-encoding",
    "upgrade",
];

pub fn proxy_routes(context: ApiContext) -> Router {
    Router::new()
        .route("/proxy/{target}/{*path}", any(proxy))
        .with_state(context)
}

fn is_forwardable(name: &HeaderName) -> bool {
    let name = name.as_str();
    !HOP_BY_HOP.contains(&name) && name != "host" && name != "content-length"
}

/// A proxy target must look like `host:port` and belong to a currently
/// registered, non-expired agent.
fn validate_target(ctx: &ApiContext, target: &str) -> Result<(), MeshError> {
    let Some((host, port)) = target.rsplit_once(':') else {
        return Err(MeshError::validation(format!(
            "proxy target must be host:port, got {:?}",
            target
        )));
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(MeshError::validation(format!(
            "proxy target must be host:port, got {:?}",
            target
        )));
    }
    if !ctx.service.state().endpoint_authorized(target) {
        return Err(MeshError::not_found("proxy target", target));
    }
    Ok(())
}

async fn proxy(
    State(ctx): State<ApiContext>,
    Path((target, path)): Path<(String, String)>,
    request: Request,
) -> ApiResult<Response> {
    validate_target(&ctx, &target)?;

    let method = request.method().clone();
    let query = request
        .uri()
        .query()
        .map(|q| format!("?{}", q))
        .unwrap_or_default();
    let url = format!("http://{}/{}{}", target, path, query);
    let headers = request.headers().clone();

    let body = axum::body::to_bytes(request.into_body(), MAX_REQUEST_BODY)
        .await
        .map_err(|e| MeshError::validation(format!("failed to read request body: {}", e)))?;

    debug!(method = %method, url = %url, "proxying mesh call");

    let outbound_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| MeshError::validation(format!("unsupported method {}", method)))?;
    let mut outbound = ctx.proxy_client.request(outbound_method, &url);
    for (name, value) in &headers {
        if is_forwardable(name) {
            if let Ok(value) = value.to_str() {
                outbound = outbound.header(name.as_str(), value);
            }
        }
    }
    if method != Method::GET && method != Method::HEAD {
        outbound = outbound.body(body);
    }

    let upstream = outbound
        .send()
        .await
        .map_err(|e| map_outbound_error(&target, e))?;

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) else {
            continue;
        };
        if is_forwardable(&name) {
            if let Ok(value) = axum::http::HeaderValue::from_bytes(value.as_bytes()) {
                response_headers.insert(name, value);
            }
        }
    }

    let stream = futures::StreamExt::map(upstream.bytes_stream(), |chunk| {
        chunk.map_err(|e| std::io::Error::other(e.to_string()))
    });
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

fn map_outbound_error(target: &str, err: reqwest::Error) -> ApiError {
    let mapped = if err.is_timeout() {
        MeshError::timeout(format!("proxy target {} timed out", target))
    } else {
        MeshError::transport(format!("proxy target {} unreachable: {}", target, err))
    };
    ApiError(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_filtered() {
        assert!(!is_forwardable(&HeaderName::from_static("connection")));
        assert!(!is_forwardable(&HeaderName::from_static("host")));
        assert!(!is_forwardable(&HeaderName::from_static("transfer-encoding")));
        assert!(is_forwardable(&HeaderName::from_static("content-type")));
        assert!(is_forwardable(&HeaderName::from_static("x-trace-id")));
        assert!(is_forwardable(&HeaderName::from_static("x-parent-span")));
    }
}
