// src/assets.rs - Tenant asset file rewriting
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{FleetError, FleetResult};
use crate::store::TenantId;

/// Filename patterns eligible for rewriting. Binary uploads and anything
/// else are left untouched.
const REWRITABLE_EXTENSIONS: &[&str] = &["css", "js", "html", "htm", "svg", "json", "txt", "xml"];

/// What the asset stage did for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRewriteOutcome {
    pub directory_found: bool,
    pub files_scanned: usize,
    pub files_changed: usize,
}

/// Rewrites URL occurrences inside a tenant's custom-asset directory,
/// `<asset_root>/<tenant_id>/`. A tenant without such a directory is
/// skipped.
pub struct AssetRewriter {
    root: PathBuf,
    dry_run: bool,
}

impl AssetRewriter {
    pub fn new(root: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            root: root.into(),
            dry_run,
        }
    }

    /// Replace `search` with `replace` in every rewritable file under the
    /// tenant's asset directory.
    pub async fn rewrite_tenant(
        &self,
        id: TenantId,
        search: &str,
        replace: &str,
    ) -> FleetResult<AssetRewriteOutcome> {
        let dir = self.root.join(id.to_string());

        let mut outcome = AssetRewriteOutcome {
            directory_found: false,
            files_scanned: 0,
            files_changed: 0,
        };

        if !dir.is_dir() {
            debug!("No asset directory for tenant {} at {}", id, dir.display());
            return Ok(outcome);
        }
        outcome.directory_found = true;

        for path in collect_rewritable_files(&dir).await? {
            outcome.files_scanned += 1;

            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    // Mis-labelled binary data; leave it alone.
                    warn!("Skipping unreadable asset {}: {}", path.display(), e);
                    continue;
                }
            };

            if !content.contains(search) {
                continue;
            }
            outcome.files_changed += 1;

            if self.dry_run {
                debug!("Would rewrite {}", path.display());
                continue;
            }

            let rewritten = content.replace(search, replace);
            write_in_place(&path, &rewritten)?;
            debug!("Rewrote {}", path.display());
        }

        Ok(outcome)
    }
}

/// Walk the tenant directory collecting files whose extension is in the
/// rewritable set, depth first, in a deterministic order.
async fn collect_rewritable_files(dir: &Path) -> FleetResult<Vec<PathBuf>> {
    let mut pending = vec![dir.to_path_buf()];
    let mut files = Vec::new();

    while let Some(current) = pending.pop() {
        let mut entries = fs::read_dir(&current)
            .await
            .map_err(|e| FleetError::FileError {
                path: current.clone(),
                message: format!("Failed to read asset directory: {}", e),
            })?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| FleetError::FileError {
            path: current.clone(),
            message: format!("Failed to read directory entry: {}", e),
        })? {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if has_rewritable_extension(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn has_rewritable_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            REWRITABLE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Swap the file contents through a temp file in the same directory so a
/// failed write never leaves a half-rewritten asset behind.
fn write_in_place(path: &Path, content: &str) -> FleetResult<()> {
    let parent = path.parent().ok_or_else(|| FleetError::FileError {
        path: path.to_path_buf(),
        message: "Asset file has no parent directory".to_string(),
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| FleetError::FileError {
        path: parent.to_path_buf(),
        message: format!("Failed to create temporary file: {}", e),
    })?;

    tmp.write_all(content.as_bytes())
        .map_err(|e| FleetError::FileError {
            path: path.to_path_buf(),
            message: format!("Failed to write rewritten asset: {}", e),
        })?;

    tmp.persist(path).map_err(|e| FleetError::FileError {
        path: path.to_path_buf(),
        message: format!("Failed to replace asset: {}", e),
    })?;

    Ok(())
}
