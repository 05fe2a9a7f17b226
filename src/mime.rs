//! Extension to content-type lookup.

use std::{collections::HashMap, path::Path};

/// Served when an extension has no entry in the table.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Built-in entries, keyed by lowercase extension with the leading dot.
const BUILTIN: &[(&str, &str)] = &[
    (".html", "text/html; charset=utf-8"),
    (".js", "application/javascript"),
    (".mjs", "application/javascript"),
    (".css", "text/css"),
    (".json", "application/json"),
    (".map", "application/json"),
    (".webmanifest", "application/manifest+json"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".gif", "image/gif"),
    (".webp", "image/webp"),
    (".svg", "image/svg+xml"),
    (".ico", "image/x-icon"),
    (".wasm", "application/wasm"),
    (".ttf", "font/ttf"),
    (".otf", "font/otf"),
    (".woff", "font/woff"),
    (".woff2", "font/woff2"),
    (".txt", "text/plain; charset=utf-8"),
    (".xml", "application/xml"),
];

/// Fixed mapping from file extension to `Content-Type`.
///
/// Extended only at startup (see [`MimeTable::insert`]); lookups never touch
/// the filesystem.
#[derive(Debug, Clone)]
pub struct MimeTable {
    types: HashMap<String, String>,
}

impl Default for MimeTable {
    fn default() -> Self {
        let types = BUILTIN
            .iter()
            .map(|(ext, ty)| ((*ext).to_string(), (*ty).to_string()))
            .collect();
        Self { types }
    }
}

impl MimeTable {
    /// Adds or replaces an entry. The extension is normalized to lowercase
    /// with a leading dot, so `"TXT"` and `".txt"` name the same key.
    pub fn insert(&mut self, extension: &str, content_type: &str) {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.types.insert(format!(".{ext}"), content_type.to_string());
    }

    /// Content type for the extension of the last path segment.
    pub fn content_type(&self, path: &Path) -> &str {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.types.get(&format!(".{}", ext.to_ascii_lowercase())))
            .map_or(OCTET_STREAM, String::as_str)
    }
}
