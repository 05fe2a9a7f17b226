//! Maps request paths to files under the asset root.
//!
//! Anything that does not name an existing file falls back to the SPA entry
//! document so client-side routing can interpret the path.

use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::StaticError;

/// The single-page application's entry document.
pub const INDEX_DOCUMENT: &str = "index.html";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    pub path: PathBuf,
    /// True when the request did not name a file and got the entry document.
    pub fallback: bool,
}

/// Turns a raw request target into a path relative to the asset root.
///
/// Query and fragment are stripped and the path is percent-decoded. Returns
/// `Ok(None)` for the root. Parent, root-prefix and drive components are
/// refused rather than normalized.
pub fn request_relative_path(raw: &str) -> Result<Option<PathBuf>, StaticError> {
    let path = raw.split(|c: char| c == '?' || c == '#').next().unwrap_or_default();
    let decoded = percent_decode_str(path).decode_utf8_lossy();

    let mut relative = PathBuf::new();
    for component in Path::new(decoded.as_ref()).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(segment) => relative.push(segment),
            Component::ParentDir | Component::Prefix(_) => return Err(StaticError::Traversal),
        }
    }

    Ok((!relative.as_os_str().is_empty()).then_some(relative))
}

/// Resolves `raw_path` against `asset_root`.
///
/// A directory holding its own `index.html` serves that file. Whatever file
/// is picked, the entry document included, must canonicalize to somewhere
/// inside the asset root.
pub async fn resolve(asset_root: &Path, raw_path: &str) -> Result<ResolvedAsset, StaticError> {
    let asset = locate(asset_root, raw_path).await?;
    ensure_within(asset_root, &asset.path).await?;
    Ok(asset)
}

async fn locate(asset_root: &Path, raw_path: &str) -> Result<ResolvedAsset, StaticError> {
    let index = asset_root.join(INDEX_DOCUMENT);
    let Some(relative) = request_relative_path(raw_path)? else {
        return Ok(ResolvedAsset {
            path: index,
            fallback: false,
        });
    };

    let candidate = asset_root.join(relative);
    let found = match fs::metadata(&candidate).await {
        Ok(meta) if meta.is_file() => Some(candidate),
        Ok(meta) if meta.is_dir() => {
            let nested = candidate.join(INDEX_DOCUMENT);
            match fs::metadata(&nested).await {
                Ok(meta) if meta.is_file() => Some(nested),
                _ => None,
            }
        }
        _ => None,
    };

    Ok(match found {
        Some(path) => ResolvedAsset {
            path,
            fallback: false,
        },
        None => ResolvedAsset {
            path: index,
            fallback: true,
        },
    })
}

/// Rejects files that symlink out of the asset root. A missing file or root
/// surfaces as a read error.
async fn ensure_within(asset_root: &Path, path: &Path) -> Result<(), StaticError> {
    let root = fs::canonicalize(asset_root)
        .await
        .map_err(|source| StaticError::Read {
            path: asset_root.to_path_buf(),
            source,
        })?;
    let target = fs::canonicalize(path).await.map_err(|source| StaticError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if target.starts_with(&root) {
        Ok(())
    } else {
        tracing::warn!("{} resolves outside {}", path.display(), root.display());
        Err(StaticError::OutsideRoot)
    }
}
