// src/resolver.rs - Site specifier resolution
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FleetError, FleetResult};
use crate::store::{TenantId, TenantStore};

/// Canonical record for one resolved tenant. Never mutated after creation;
/// the orchestrator and discovery engine only read it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSite {
    pub id: TenantId,
    pub domain: String,
}

/// A token from the specifier list that did not produce a site, with the
/// reason it was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedToken {
    pub token: String,
    pub reason: String,
}

/// Outcome of resolving one raw specifier: the sites that resolved plus an
/// explicit record of every token that was silently dropped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub resolved: Vec<ResolvedSite>,
    pub skipped: Vec<SkippedToken>,
}

/// Turns raw user input - a numeric id, a domain, a bare path, or a
/// comma-separated list of any of those - into canonical `(id, domain)`
/// pairs via the primary tenant table with a mapping-table fallback.
pub struct SiteResolver {
    store: Arc<dyn TenantStore>,
    root_domain: String,
}

impl SiteResolver {
    pub fn new(store: Arc<dyn TenantStore>, root_domain: impl Into<String>) -> Self {
        Self {
            store,
            root_domain: root_domain.into(),
        }
    }

    /// Resolve a raw specifier. Individual tokens in a list may fail and be
    /// skipped; the call as a whole fails only when nothing resolves. A
    /// numeric id with no address on record aborts immediately, since an
    /// orphaned id means the tenant table itself is broken.
    pub async fn resolve(&self, raw: &str) -> FleetResult<Resolution> {
        let trimmed = raw.trim().trim_matches(',').trim();
        debug!("resolve(): {:?}", trimmed);

        if trimmed.is_empty() {
            return Err(FleetError::Usage(
                "at least one site id or domain is required".to_string(),
            ));
        }

        let mut resolution = Resolution::default();
        let mut seen: HashSet<TenantId> = HashSet::new();

        if trimmed.contains(',') {
            for token in trimmed.split(',') {
                let token = token.trim();
                if token.is_empty() {
                    continue;
                }
                match self.resolve_single(token).await? {
                    Some(site) => {
                        if seen.insert(site.id) {
                            resolution.resolved.push(site);
                        } else {
                            debug!("duplicate token {:?} for tenant {}", token, site.id);
                            resolution.skipped.push(SkippedToken {
                                token: token.to_string(),
                                reason: format!("duplicate of tenant {}", site.id),
                            });
                        }
                    }
                    None => {
                        resolution.skipped.push(SkippedToken {
                            token: token.to_string(),
                            reason: "no matching tenant".to_string(),
                        });
                    }
                }
            }

            if resolution.resolved.is_empty() {
                return Err(FleetError::Usage(
                    "none of the supplied site tokens resolved to a tenant".to_string(),
                ));
            }
        } else {
            match self.resolve_single(trimmed).await? {
                Some(site) => {
                    seen.insert(site.id);
                    resolution.resolved.push(site);
                }
                None => {
                    return Err(FleetError::Usage(format!(
                        "no tenant matches '{}'",
                        trimmed
                    )));
                }
            }
        }

        Ok(resolution)
    }

    /// Single-token resolution. Returns `Ok(None)` for a token that simply
    /// does not match any tenant; list-building callers treat that as skip.
    async fn resolve_single(&self, token: &str) -> FleetResult<Option<ResolvedSite>> {
        debug!("resolve_single(): {}", token);

        if token.chars().all(|c| c.is_ascii_digit()) {
            return self.resolve_numeric(token).await;
        }

        debug!("resolve_single(): not numeric");

        // A period means a domain; anything else is a path under the
        // install's own root domain.
        if token.contains('.') {
            self.resolve_domain(token).await
        } else {
            self.resolve_path(token).await
        }
    }

    async fn resolve_numeric(&self, token: &str) -> FleetResult<Option<ResolvedSite>> {
        let id = match token.parse::<u64>() {
            Ok(id) if id > 0 => TenantId(id),
            // Zero or out-of-range numbers cannot denote a tenant.
            _ => return Ok(None),
        };

        match self.store.canonical_address(id).await? {
            Some(domain) => Ok(Some(ResolvedSite { id, domain })),
            None => Err(FleetError::OrphanedTenant(id.0)),
        }
    }

    async fn resolve_domain(&self, token: &str) -> FleetResult<Option<ResolvedSite>> {
        let domain = strip_scheme(token);
        debug!("resolve_domain(): {}", domain);

        if let Some(id) = self.store.tenant_id_for_address(domain, "/").await? {
            return Ok(Some(ResolvedSite {
                id,
                domain: domain.to_string(),
            }));
        }

        debug!("resolve_domain(): not in primary table, checking domain map");

        match self.store.mapped_tenant_id(domain).await? {
            Some(id) => Ok(Some(ResolvedSite {
                id,
                domain: domain.to_string(),
            })),
            None => Ok(None),
        }
    }

    async fn resolve_path(&self, token: &str) -> FleetResult<Option<ResolvedSite>> {
        let slug = token.trim_matches('/');
        let path = format!("/{}/", slug);
        debug!("resolve_path(): {} under {}", path, self.root_domain);

        match self
            .store
            .tenant_id_for_address(&self.root_domain, &path)
            .await?
        {
            Some(id) => Ok(Some(ResolvedSite {
                id,
                domain: format!("{}/{}", self.root_domain, slug),
            })),
            None => Ok(None),
        }
    }
}

fn strip_scheme(token: &str) -> &str {
    token
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockTenantStore;
    use mockall::predicate::eq;

    fn resolver(store: MockTenantStore) -> SiteResolver {
        SiteResolver::new(Arc::new(store), "root.example.org")
    }

    #[tokio::test]
    async fn numeric_token_resolves_via_recorded_address() {
        let mut store = MockTenantStore::new();
        store
            .expect_canonical_address()
            .with(eq(TenantId(123)))
            .returning(|_| Ok(Some("tenant.example.org".to_string())));

        let resolution = resolver(store).resolve("123").await.unwrap();

        assert_eq!(
            resolution.resolved,
            vec![ResolvedSite {
                id: TenantId(123),
                domain: "tenant.example.org".to_string(),
            }]
        );
        assert!(resolution.skipped.is_empty());
    }

    #[tokio::test]
    async fn orphaned_numeric_id_is_fatal() {
        let mut store = MockTenantStore::new();
        store
            .expect_canonical_address()
            .returning(|_| Ok(None));

        let err = resolver(store).resolve("77").await.unwrap_err();

        assert!(matches!(err, FleetError::OrphanedTenant(77)));
    }

    #[tokio::test]
    async fn domain_in_primary_table_skips_the_mapping_table() {
        let mut store = MockTenantStore::new();
        store
            .expect_tenant_id_for_address()
            .with(eq("known.example.org"), eq("/"))
            .returning(|_, _| Ok(Some(TenantId(5))));
        store.expect_mapped_tenant_id().times(0);

        let resolution = resolver(store).resolve("known.example.org").await.unwrap();

        assert_eq!(resolution.resolved[0].id, TenantId(5));
        assert_eq!(resolution.resolved[0].domain, "known.example.org");
    }

    #[tokio::test]
    async fn primary_miss_falls_back_to_the_mapping_table() {
        let mut store = MockTenantStore::new();
        store
            .expect_tenant_id_for_address()
            .returning(|_, _| Ok(None));
        store
            .expect_mapped_tenant_id()
            .with(eq("custom.example.com"))
            .returning(|_| Ok(Some(TenantId(9))));

        let resolution = resolver(store).resolve("custom.example.com").await.unwrap();

        assert_eq!(resolution.resolved[0].id, TenantId(9));
    }

    #[tokio::test]
    async fn domain_absent_from_both_tables_is_a_usage_error() {
        let mut store = MockTenantStore::new();
        store
            .expect_tenant_id_for_address()
            .returning(|_, _| Ok(None));
        store.expect_mapped_tenant_id().returning(|_| Ok(None));

        let err = resolver(store).resolve("ghost.example.com").await.unwrap_err();

        assert!(matches!(err, FleetError::Usage(_)));
    }

    #[tokio::test]
    async fn bare_path_resolves_under_the_root_domain() {
        let mut store = MockTenantStore::new();
        store
            .expect_tenant_id_for_address()
            .with(eq("root.example.org"), eq("/science/"))
            .returning(|_, _| Ok(Some(TenantId(31))));

        let resolution = resolver(store).resolve("science").await.unwrap();

        assert_eq!(resolution.resolved[0].id, TenantId(31));
        assert_eq!(resolution.resolved[0].domain, "root.example.org/science");
    }

    #[tokio::test]
    async fn list_drops_unresolvable_tokens_without_aborting() {
        let mut store = MockTenantStore::new();
        store.expect_canonical_address().returning(|id| {
            Ok(Some(format!("tenant{}.example.org", id.0)))
        });
        store
            .expect_tenant_id_for_address()
            .returning(|_, _| Ok(None));
        store.expect_mapped_tenant_id().returning(|_| Ok(None));

        let resolution = resolver(store)
            .resolve("123, bad.domain, 456")
            .await
            .unwrap();

        let ids: Vec<TenantId> = resolution.resolved.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![TenantId(123), TenantId(456)]);
        assert_eq!(resolution.skipped.len(), 1);
        assert_eq!(resolution.skipped[0].token, "bad.domain");
    }

    #[tokio::test]
    async fn list_where_nothing_resolves_is_a_usage_error() {
        let mut store = MockTenantStore::new();
        store
            .expect_tenant_id_for_address()
            .returning(|_, _| Ok(None));
        store.expect_mapped_tenant_id().returning(|_| Ok(None));

        let err = resolver(store)
            .resolve("gone.example.com, also-gone.example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::Usage(_)));
    }

    #[tokio::test]
    async fn duplicate_tokens_resolve_once() {
        let mut store = MockTenantStore::new();
        store
            .expect_canonical_address()
            .returning(|_| Ok(Some("tenant.example.org".to_string())));

        let resolution = resolver(store).resolve("123,123").await.unwrap();

        assert_eq!(resolution.resolved.len(), 1);
        assert_eq!(resolution.skipped.len(), 1);
        assert!(resolution.skipped[0].reason.contains("duplicate"));
    }

    #[tokio::test]
    async fn empty_input_is_a_usage_error() {
        for raw in ["", "   ", ",,", " , "] {
            let store = MockTenantStore::new();
            let err = resolver(store).resolve(raw).await.unwrap_err();
            assert!(matches!(err, FleetError::Usage(_)), "input {:?}", raw);
        }
    }

    #[tokio::test]
    async fn scheme_prefixes_are_stripped_before_lookup() {
        let mut store = MockTenantStore::new();
        store
            .expect_tenant_id_for_address()
            .with(eq("known.example.org"), eq("/"))
            .returning(|_, _| Ok(Some(TenantId(5))));

        let resolution = resolver(store)
            .resolve("https://known.example.org/")
            .await
            .unwrap();

        assert_eq!(resolution.resolved[0].domain, "known.example.org");
    }
}
