// src/cache.rs - File-backed report cache with a fixed TTL
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tracing::{debug, warn};

use crate::error::{FleetError, FleetResult};
use crate::report::FleetReport;

/// Cached reports older than this are recomputed in full.
const REPORT_TTL_HOURS: i64 = 12;

/// One cache slot per configuration fingerprint, so runs with different
/// prefixes or addressing modes never serve each other's results.
pub struct ReportCache {
    path: PathBuf,
}

impl ReportCache {
    pub fn new(data_dir: &Path, fingerprint: &str) -> Self {
        Self {
            path: data_dir
                .join("cache")
                .join(format!("fleet-report-{}.json", fingerprint)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The cached report if one exists and is younger than the TTL. An
    /// unreadable cache file counts as a miss, not an error.
    pub async fn load_fresh(&self) -> Option<FleetReport> {
        let content = tokio::fs::read_to_string(&self.path).await.ok()?;

        let report: FleetReport = match serde_json::from_str(&content) {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    "Ignoring unreadable report cache {}: {}",
                    self.path.display(),
                    e
                );
                return None;
            }
        };

        let age = Utc::now().signed_duration_since(report.generated_at);
        if age > Duration::hours(REPORT_TTL_HOURS) {
            debug!(
                "Report cache expired ({} hours old): {}",
                age.num_hours(),
                self.path.display()
            );
            return None;
        }

        Some(report)
    }

    pub async fn store(&self, report: &FleetReport) -> FleetResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FleetError::FileError {
                    path: parent.to_path_buf(),
                    message: format!("Failed to create cache directory: {}", e),
                })?;
        }

        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| FleetError::FileError {
                path: self.path.clone(),
                message: format!("Failed to write report cache: {}", e),
            })?;

        debug!("Cached fleet report at {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ContactRecord;
    use crate::store::TenantId;

    fn report_with(records: Vec<ContactRecord>) -> FleetReport {
        FleetReport::new(records)
    }

    fn record(id: u64) -> ContactRecord {
        ContactRecord {
            tenant_id: TenantId(id),
            canonical_url: format!("https://{}.example.org", id),
            mapped_domain: format!("{}.example.com", id),
            admin_email: format!("admin@{}.example.com", id),
        }
    }

    #[tokio::test]
    async fn fresh_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReportCache::new(dir.path(), "fleet_-subdomain-example-org");

        assert!(cache.load_fresh().await.is_none());

        let report = report_with(vec![record(1), record(2)]);
        cache.store(&report).await.unwrap();

        let loaded = cache.load_fresh().await.unwrap();
        assert_eq!(loaded.records, report.records);
    }

    #[tokio::test]
    async fn expired_report_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReportCache::new(dir.path(), "key");

        let mut report = report_with(vec![record(1)]);
        report.generated_at = Utc::now() - Duration::hours(REPORT_TTL_HOURS + 1);
        cache.store(&report).await.unwrap();

        assert!(cache.load_fresh().await.is_none());
    }

    #[tokio::test]
    async fn report_just_inside_the_ttl_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReportCache::new(dir.path(), "key");

        let mut report = report_with(vec![record(1)]);
        report.generated_at = Utc::now() - Duration::hours(REPORT_TTL_HOURS - 1);
        cache.store(&report).await.unwrap();

        assert!(cache.load_fresh().await.is_some());
    }

    #[tokio::test]
    async fn corrupt_cache_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ReportCache::new(dir.path(), "key");

        std::fs::create_dir_all(cache.path().parent().unwrap()).unwrap();
        std::fs::write(cache.path(), "{not json").unwrap();

        assert!(cache.load_fresh().await.is_none());
    }

    #[tokio::test]
    async fn different_fingerprints_use_different_slots() {
        let dir = tempfile::tempdir().unwrap();
        let a = ReportCache::new(dir.path(), "one");
        let b = ReportCache::new(dir.path(), "two");

        a.store(&report_with(vec![record(1)])).await.unwrap();

        assert!(a.load_fresh().await.is_some());
        assert!(b.load_fresh().await.is_none());
    }
}
