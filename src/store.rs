// src/store.rs - Tenant datastore interface and MySQL adapter
use std::fmt;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use tracing::debug;

use crate::config::{InstallMode, RunConfig};
use crate::error::{FleetError, FleetResult};

/// Identifier of one tenant in the primary tenant table. Always a positive
/// integer; zero is the store's "no such tenant" sentinel and never leaves
/// the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

static TABLE_COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("static identifier pattern"));

/// Reject anything that is not a plain SQL identifier fragment before it can
/// reach a table-name position. Tenant ids are typed integers, so the prefix
/// is the only free-form component.
pub fn validate_table_component(component: &str) -> FleetResult<()> {
    if component.is_empty() || !TABLE_COMPONENT.is_match(component) {
        return Err(FleetError::InvalidIdentifier(component.to_string()));
    }
    Ok(())
}

/// Assembles the sharded table names for a validated prefix. Content and
/// options tables exist once per tenant under `<prefix><tenant_id>_<suffix>`.
#[derive(Debug, Clone)]
pub struct TableNames {
    prefix: String,
}

impl TableNames {
    pub fn new(prefix: &str) -> FleetResult<Self> {
        validate_table_component(prefix)?;
        Ok(Self {
            prefix: prefix.to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Primary tenant table.
    pub fn tenants(&self) -> String {
        format!("{}tenants", self.prefix)
    }

    /// Secondary custom-domain mapping table.
    pub fn domain_map(&self) -> String {
        format!("{}domain_map", self.prefix)
    }

    /// Per-tenant content table.
    pub fn content(&self, id: TenantId) -> String {
        format!("{}{}_content", self.prefix, id)
    }

    /// Per-tenant options table.
    pub fn options(&self, id: TenantId) -> String {
        format!("{}{}_options", self.prefix, id)
    }

    /// LIKE pattern covering every table in one tenant's namespace, used to
    /// scope the content rewrite.
    pub fn tenant_pattern(&self, id: TenantId) -> String {
        format!("{}{}_%", self.prefix, id)
    }
}

/// Query interface the resolver, orchestrator, and discovery engine need
/// from the relational store. Everything returns deterministic scalars;
/// the adapter owns connection handling and sharded-table naming.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Whether the target install is multi-tenant at all. Checked before
    /// any command logic runs.
    async fn is_multi_tenant(&self) -> FleetResult<bool>;

    /// Exact domain+path match against the primary tenant table. A zero id
    /// in the table is treated as "not present".
    async fn tenant_id_for_address(&self, domain: &str, path: &str)
        -> FleetResult<Option<TenantId>>;

    /// Custom-domain mapping table lookup; absence here is a genuine
    /// not-found.
    async fn mapped_tenant_id(&self, domain: &str) -> FleetResult<Option<TenantId>>;

    /// Reverse lookup: the tenant's canonical address, using the domain or
    /// path column depending on the install's addressing mode.
    async fn canonical_address(&self, id: TenantId) -> FleetResult<Option<String>>;

    /// All non-archived tenant ids, ascending.
    async fn active_tenant_ids(&self) -> FleetResult<Vec<TenantId>>;

    /// Probe whether a sharded table exists.
    async fn table_exists(&self, table: &str) -> FleetResult<bool>;

    /// Whether the tenant's content table holds at least one row with a
    /// non-empty protection token.
    async fn has_protected_content(&self, id: TenantId) -> FleetResult<bool>;

    /// The tenant's mapped custom domain, if any.
    async fn mapped_domain(&self, id: TenantId) -> FleetResult<Option<String>>;

    /// A single value from the tenant's options table.
    async fn tenant_option(&self, id: TenantId, name: &str) -> FleetResult<Option<String>>;
}

/// Production adapter over a MySQL-compatible install.
pub struct MySqlTenantStore {
    pool: MySqlPool,
    tables: TableNames,
    install_mode: InstallMode,
    root_domain: String,
}

impl MySqlTenantStore {
    pub async fn connect(config: &RunConfig) -> FleetResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(4)
            .connect(&config.database_url)
            .await?;

        Ok(Self {
            pool,
            tables: TableNames::new(&config.table_prefix)?,
            install_mode: config.install_mode,
            root_domain: config.root_domain.clone(),
        })
    }
}

#[async_trait]
impl TenantStore for MySqlTenantStore {
    async fn is_multi_tenant(&self) -> FleetResult<bool> {
        self.table_exists(&self.tables.tenants()).await
    }

    async fn tenant_id_for_address(
        &self,
        domain: &str,
        path: &str,
    ) -> FleetResult<Option<TenantId>> {
        let query = format!(
            "SELECT tenant_id FROM {} WHERE domain = ? AND path = ? LIMIT 1",
            self.tables.tenants()
        );
        let id: Option<u64> = sqlx::query_scalar(&query)
            .bind(domain)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        debug!("tenant_id_for_address({}, {}): {:?}", domain, path, id);
        Ok(id.filter(|id| *id != 0).map(TenantId))
    }

    async fn mapped_tenant_id(&self, domain: &str) -> FleetResult<Option<TenantId>> {
        let query = format!(
            "SELECT tenant_id FROM {} WHERE domain = ? LIMIT 1",
            self.tables.domain_map()
        );
        let id: Option<u64> = sqlx::query_scalar(&query)
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;

        debug!("mapped_tenant_id({}): {:?}", domain, id);
        Ok(id.filter(|id| *id != 0).map(TenantId))
    }

    async fn canonical_address(&self, id: TenantId) -> FleetResult<Option<String>> {
        match self.install_mode {
            InstallMode::Subdomain => {
                let query = format!(
                    "SELECT domain FROM {} WHERE tenant_id = ? LIMIT 1",
                    self.tables.tenants()
                );
                let domain: Option<String> = sqlx::query_scalar(&query)
                    .bind(id.0)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(domain.filter(|d| !d.is_empty()))
            }
            InstallMode::Path => {
                let query = format!(
                    "SELECT path FROM {} WHERE tenant_id = ? LIMIT 1",
                    self.tables.tenants()
                );
                let path: Option<String> = sqlx::query_scalar(&query)
                    .bind(id.0)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(path.map(|p| {
                    let trimmed = p.trim_end_matches('/');
                    format!("{}{}", self.root_domain, trimmed)
                }))
            }
        }
    }

    async fn active_tenant_ids(&self) -> FleetResult<Vec<TenantId>> {
        let query = format!(
            "SELECT tenant_id FROM {} WHERE archived = 0 AND deleted = 0 ORDER BY tenant_id",
            self.tables.tenants()
        );
        let ids: Vec<u64> = sqlx::query_scalar(&query).fetch_all(&self.pool).await?;
        Ok(ids.into_iter().filter(|id| *id != 0).map(TenantId).collect())
    }

    async fn table_exists(&self, table: &str) -> FleetResult<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn has_protected_content(&self, id: TenantId) -> FleetResult<bool> {
        let query = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE protect_token IS NOT NULL AND protect_token <> '')",
            self.tables.content(id)
        );
        let flagged: i64 = sqlx::query_scalar(&query).fetch_one(&self.pool).await?;
        Ok(flagged != 0)
    }

    async fn mapped_domain(&self, id: TenantId) -> FleetResult<Option<String>> {
        let query = format!(
            "SELECT domain FROM {} WHERE tenant_id = ? LIMIT 1",
            self.tables.domain_map()
        );
        let domain: Option<String> = sqlx::query_scalar(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(domain.filter(|d| !d.is_empty()))
    }

    async fn tenant_option(&self, id: TenantId, name: &str) -> FleetResult<Option<String>> {
        let query = format!(
            "SELECT option_value FROM {} WHERE option_name = ? LIMIT 1",
            self.tables.options(id)
        );
        let value: Option<String> = sqlx::query_scalar(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_follow_sharded_convention() {
        let tables = TableNames::new("fleet_").unwrap();

        assert_eq!(tables.tenants(), "fleet_tenants");
        assert_eq!(tables.domain_map(), "fleet_domain_map");
        assert_eq!(tables.content(TenantId(42)), "fleet_42_content");
        assert_eq!(tables.options(TenantId(42)), "fleet_42_options");
        assert_eq!(tables.tenant_pattern(TenantId(42)), "fleet_42_%");
    }

    #[test]
    fn prefix_must_be_a_plain_identifier() {
        assert!(TableNames::new("fleet_").is_ok());
        assert!(TableNames::new("Fleet9").is_ok());

        for bad in ["", "fleet-", "fleet ", "fleet;drop table x;", "pre`fix"] {
            assert!(
                matches!(TableNames::new(bad), Err(FleetError::InvalidIdentifier(_))),
                "prefix {:?} should be rejected",
                bad
            );
        }
    }
}
