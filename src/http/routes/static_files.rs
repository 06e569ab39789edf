//! SPA fallback: serve the static dashboard bundle for any non-`/api/*` path
//!. The SPA itself is an external collaborator; this crate only owns the serving mechanics —
//! directory-traversal-safe static files with an index fallback for client-side
//! routing.

use tower_http::services::{ServeDir, ServeFile};

/// `tower_http::services::ServeDir` already canonicalizes and rejects `..`
/// segments that would escape `root`; the `ServeFile` fallback serves the SPA
/// entry point for any path it doesn't recognize as a real asset.
pub fn service(root: &str) -> tower_http::services::ServeDir<ServeFile> {
    let index = format!("{root}/index.html");
    ServeDir::new(root).fallback(ServeFile::new(index))
}
