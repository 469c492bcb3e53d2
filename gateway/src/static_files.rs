use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Serves files from one directory tree for paths no function claims.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StaticFile {
    pub content_type: &'static str,
    pub body: Bytes,
}

impl StaticFiles {
    /// Fails when `root` is not an existing directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = std::fs::canonicalize(root)
            .with_context(|| format!("static directory {} does not exist", root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("{} is not a directory", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads the file for a request path; `None` when there is nothing to
    /// serve or the path would leave the root.
    pub async fn load(&self, request_path: &str) -> Option<StaticFile> {
        let mut path = self.root.clone();
        for component in Path::new(request_path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                _ => {
                    debug!("Refusing static path {}", request_path);
                    return None;
                }
            }
        }

        if tokio::fs::metadata(&path).await.ok()?.is_dir() {
            path.push("index.html");
        }

        // Symlinks may still point outside the root
        let resolved = tokio::fs::canonicalize(&path).await.ok()?;
        if !resolved.starts_with(&self.root) {
            debug!("Refusing static path {} outside {}", request_path, self.root.display());
            return None;
        }

        let body = tokio::fs::read(&resolved).await.ok()?;
        Some(StaticFile {
            content_type: content_type(&resolved),
            body: Bytes::from(body),
        })
    }
}

fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
