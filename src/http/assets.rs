//! Static web client serving with single-page-app fallback.
//!
//! `/assets/*` must exist on disk. `/`, `/room/*` and any path that is not a
//! file under the root are answered with `index.html`, so client-side routes
//! survive a reload.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use tracing::{debug, warn};

use super::text;

const INDEX: &str = "index.html";

/// Resolve `request_path` under `root`; `None` if it tries to leave the root
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for segment in request_path.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment.contains('\\') {
            return None;
        }
        match Path::new(segment).components().next() {
            Some(Component::Normal(part)) => resolved.push(part),
            _ => return None,
        }
    }
    Some(resolved)
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("wasm") => "application/wasm",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

async fn file_response(path: &Path) -> Option<Response<Full<Bytes>>> {
    match tokio::fs::read(path).await {
        Ok(contents) => {
            let mut response = Response::new(Full::new(Bytes::from(contents)));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(content_type(path)),
            );
            Some(response)
        }
        Err(e) => {
            debug!("Cannot read {}: {}", path.display(), e);
            None
        }
    }
}

async fn index(root: &Path) -> Response<Full<Bytes>> {
    let index_path = root.join(INDEX);
    match file_response(&index_path).await {
        Some(response) => response,
        None => {
            warn!("index.html not found at {}", index_path.display());
            text(StatusCode::NOT_FOUND, "index.html not found")
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Serve `request_path` from `root`
pub async fn serve(root: &Path, request_path: &str) -> Response<Full<Bytes>> {
    let Some(path) = resolve(root, request_path) else {
        debug!("Refusing path outside static root: {}", request_path);
        return text(StatusCode::NOT_FOUND, "Not Found");
    };

    if request_path.starts_with("/assets/") {
        return match file_response(&path).await {
            Some(response) => response,
            None => text(StatusCode::NOT_FOUND, "Not Found"),
        };
    }

    if request_path == "/" || request_path.starts_with("/room/") || !is_file(&path).await {
        return index(root).await;
    }

    match file_response(&path).await {
        Some(response) => response,
        None => index(root).await,
    }
}
