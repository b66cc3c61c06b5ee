// src/web.rs
//! HTTP serving facade.
//!
//! File mode answers `GET /live` with the HTML file and serves sibling
//! assets from the watch root. Directory mode serves static files and falls
//! back to `index.html` so client-side routes load from any deep link.
//! Every HTML response gets the reload client loader injected.

use crate::reload;
use crate::target::ServeTarget;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Route of the single served file in file mode.
pub const LIVE_ROUTE: &str = "/live";

/// Largest HTML body the injection middleware will buffer.
const MAX_INJECT_BYTES: usize = 64 * 1024 * 1024;

const CLOSING_BODY: &[u8] = b"</body>";
const CLIENT_MARKER: &[u8] = b"livereload.js";

/// Builds the router for `target`, injecting a loader for the reload channel on `reload_port`.
pub fn router(target: &ServeTarget, reload_port: u16) -> Router {
    let routes = match target {
        ServeTarget::File { path, watch_root } => Router::new()
            .route(LIVE_ROUTE, get(serve_live))
            .with_state(Arc::new(path.clone()))
            .fallback_service(ServeDir::new(watch_root)),
        ServeTarget::Directory {
            path,
            fallback_file,
        } => Router::new()
            .fallback_service(ServeDir::new(path).fallback(ServeFile::new(fallback_file))),
    };

    let snippet: Arc<str> = reload::client_snippet(reload_port).into();
    routes
        .layer(middleware::from_fn_with_state(snippet, inject_reload_client))
        .layer(TraceLayer::new_for_http())
}

/// Reads the file on every request so edits show up on reload.
async fn serve_live(State(file): State<Arc<PathBuf>>) -> Response {
    match tokio::fs::read(file.as_path()).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "text/html; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            bytes,
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to read {}: {}", file.display(), e);
            (
                StatusCode::NOT_FOUND,
                format!("Cannot read {}: {}", file.display(), e),
            )
                .into_response()
        }
    }
}

async fn inject_reload_client(
    State(snippet): State<Arc<str>>,
    request: Request,
    next: Next,
) -> Response {
    let is_head = request.method() == Method::HEAD;
    let response = next.run(request).await;

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"));
    if is_head || !is_html || response.status() != StatusCode::OK {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_INJECT_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to buffer HTML response for injection: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read response body")
                .into_response();
        }
    };

    let injected = inject_snippet(&bytes, snippet.as_bytes());
    debug!("Injected reload client ({} -> {} bytes)", bytes.len(), injected.len());
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(injected))
}

/// Inserts `snippet` before the last `</body>`, or appends it when there is none.
///
/// Pages that already reference the client script are left alone.
pub fn inject_snippet(html: &[u8], snippet: &[u8]) -> Vec<u8> {
    if html
        .windows(CLIENT_MARKER.len())
        .any(|w| w == CLIENT_MARKER)
    {
        return html.to_vec();
    }

    let mut result = Vec::with_capacity(html.len() + snippet.len());
    match html
        .windows(CLOSING_BODY.len())
        .rposition(|w| w.eq_ignore_ascii_case(CLOSING_BODY))
    {
        Some(pos) => {
            result.extend_from_slice(&html[..pos]);
            result.extend_from_slice(snippet);
            result.extend_from_slice(&html[pos..]);
        }
        None => {
            result.extend_from_slice(html);
            result.extend_from_slice(snippet);
        }
    }
    result
}
