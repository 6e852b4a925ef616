//! Bearer token files managed by Kubernetes.
//!
//! Projected service account tokens are rotated by the kubelet, so callers
//! read the file again whenever they need a fresh value.

use std::path::Path;

/// Read a token file, stripping surrounding whitespace
pub async fn read_token(path: &Path) -> std::io::Result<String> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(raw.trim().to_string())
}

/// Blocking variant used during startup
pub fn read_token_blocking(path: &Path) -> std::io::Result<String> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw.trim().to_string())
}
