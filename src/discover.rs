// src/discover.rs - Fleet-wide discovery of protected, domain-mapped tenants
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::cache::ReportCache;
use crate::error::{FleetError, FleetResult};
use crate::report::{ContactRecord, FleetReport};
use crate::store::{TableNames, TenantId, TenantStore};

/// Option names read from each qualifying tenant's options table.
const OPTION_SITE_URL: &str = "site_url";
const OPTION_ADMIN_EMAIL: &str = "admin_email";

/// Walks every active tenant, probes its sharded content table, scans for
/// protected content, cross-references the domain-mapping table, and
/// assembles the cached contact report.
pub struct FleetDiscovery {
    store: Arc<dyn TenantStore>,
    tables: TableNames,
    cache: ReportCache,
    dry_run: bool,
    show_progress: bool,
}

impl FleetDiscovery {
    pub fn new(
        store: Arc<dyn TenantStore>,
        tables: TableNames,
        cache: ReportCache,
        dry_run: bool,
        show_progress: bool,
    ) -> Self {
        Self {
            store,
            tables,
            cache,
            dry_run,
            show_progress,
        }
    }

    /// Produce the fleet contact report. Served from cache while fresh;
    /// recomputed in full on a miss, never patched incrementally.
    pub async fn discover(&self) -> FleetResult<FleetReport> {
        if let Some(report) = self.cache.load_fresh().await {
            info!("Serving fleet report from cache ({} record(s))", report.len());
            return Ok(report);
        }

        let ids = self.store.active_tenant_ids().await?;
        if ids.is_empty() {
            return Err(FleetError::Precondition(
                "no active tenants to probe".to_string(),
            ));
        }

        info!("Probing {} tenant(s) for protected content", ids.len());

        // One remote probe per tenant; tick so large fleets show movement.
        let progress = if self.show_progress {
            let bar = ProgressBar::new(ids.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{bar:40.green} {pos}/{len} {msg}")
                    .expect("static progress template"),
            );
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut qualifying: Vec<(TenantId, String)> = Vec::new();
        for id in &ids {
            progress.set_message(format!("tenant {}", id));
            if let Some(mapped_domain) = self.probe_tenant(*id).await? {
                qualifying.push((*id, mapped_domain));
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        let mut records = Vec::with_capacity(qualifying.len());
        for (id, mapped_domain) in qualifying {
            let canonical_url = self
                .store
                .tenant_option(id, OPTION_SITE_URL)
                .await?
                .unwrap_or_default();
            let admin_email = self
                .store
                .tenant_option(id, OPTION_ADMIN_EMAIL)
                .await?
                .unwrap_or_default();

            records.push(ContactRecord {
                tenant_id: id,
                canonical_url,
                mapped_domain,
                admin_email,
            });
        }

        let report = FleetReport::new(records);
        info!("Fleet report assembled: {} record(s)", report.len());

        if self.dry_run {
            info!("Dry run - not caching the fleet report");
        } else {
            self.cache.store(&report).await?;
        }

        Ok(report)
    }

    /// One tenant qualifies when its content table exists, holds at least
    /// one row with a non-empty protection token, and the tenant itself is
    /// domain-mapped. Returns the mapped domain when all three hold.
    async fn probe_tenant(&self, id: TenantId) -> FleetResult<Option<String>> {
        let table = self.tables.content(id);

        if !self.store.table_exists(&table).await? {
            debug!("Tenant {} has no content table {}", id, table);
            return Ok(None);
        }

        if !self.store.has_protected_content(id).await? {
            return Ok(None);
        }

        match self.store.mapped_domain(id).await? {
            Some(domain) => Ok(Some(domain)),
            None => {
                debug!(
                    "Tenant {} has protected content but no domain mapping; excluded",
                    id
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockTenantStore;
    use mockall::predicate::eq;

    fn discovery(
        store: MockTenantStore,
        cache_dir: &std::path::Path,
        dry_run: bool,
    ) -> FleetDiscovery {
        FleetDiscovery::new(
            Arc::new(store),
            TableNames::new("fleet_").unwrap(),
            ReportCache::new(cache_dir, "test"),
            dry_run,
            false,
        )
    }

    /// Fleet of three: tenant 1 qualifies, tenant 2 is flagged but not
    /// mapped, tenant 3 is mapped but has nothing flagged.
    fn three_tenant_store() -> MockTenantStore {
        let mut store = MockTenantStore::new();
        store
            .expect_active_tenant_ids()
            .times(1)
            .returning(|| Ok(vec![TenantId(1), TenantId(2), TenantId(3)]));
        store.expect_table_exists().returning(|_| Ok(true));
        store
            .expect_has_protected_content()
            .returning(|id| Ok(id.0 != 3));
        store.expect_mapped_domain().returning(|id| {
            Ok(if id.0 == 2 {
                None
            } else {
                Some(format!("mapped{}.example.com", id.0))
            })
        });
        store
            .expect_tenant_option()
            .with(eq(TenantId(1)), eq(OPTION_SITE_URL))
            .returning(|_, _| Ok(Some("https://one.example.org".to_string())));
        store
            .expect_tenant_option()
            .with(eq(TenantId(1)), eq(OPTION_ADMIN_EMAIL))
            .returning(|_, _| Ok(Some("admin@one.example.org".to_string())));
        store
    }

    #[tokio::test]
    async fn only_flagged_and_mapped_tenants_make_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = discovery(three_tenant_store(), dir.path(), false)
            .discover()
            .await
            .unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(
            report.records[0],
            ContactRecord {
                tenant_id: TenantId(1),
                canonical_url: "https://one.example.org".to_string(),
                mapped_domain: "mapped1.example.com".to_string(),
                admin_email: "admin@one.example.org".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn missing_content_table_excludes_the_tenant() {
        let dir = tempfile::tempdir().unwrap();

        let mut store = MockTenantStore::new();
        store
            .expect_active_tenant_ids()
            .returning(|| Ok(vec![TenantId(9)]));
        store
            .expect_table_exists()
            .with(eq("fleet_9_content"))
            .returning(|_| Ok(false));
        // The scan must never run against a table that does not exist.
        store.expect_has_protected_content().times(0);

        let report = discovery(store, dir.path(), false)
            .discover()
            .await
            .unwrap();

        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn second_call_within_the_ttl_is_served_from_cache() {
        let dir = tempfile::tempdir().unwrap();

        // active_tenant_ids is limited to one call; a second enumeration
        // would trip the mock.
        let first = discovery(three_tenant_store(), dir.path(), false);
        let initial = first.discover().await.unwrap();

        let untouchable = MockTenantStore::new();
        let second = discovery(untouchable, dir.path(), false);
        let cached = second.discover().await.unwrap();

        assert_eq!(cached.records, initial.records);
    }

    #[tokio::test]
    async fn dry_run_never_writes_the_cache() {
        let dir = tempfile::tempdir().unwrap();

        let engine = discovery(three_tenant_store(), dir.path(), true);
        engine.discover().await.unwrap();

        assert!(engine.cache.load_fresh().await.is_none());
    }

    #[tokio::test]
    async fn empty_fleet_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();

        let mut store = MockTenantStore::new();
        store.expect_active_tenant_ids().returning(|| Ok(vec![]));

        let err = discovery(store, dir.path(), false)
            .discover()
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::Precondition(_)));
    }
}
