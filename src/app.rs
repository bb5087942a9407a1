// src/app.rs - Application wiring and command execution
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::assets::AssetRewriter;
use crate::cache::ReportCache;
use crate::config::{OutputTarget, RunConfig};
use crate::confirm::TerminalGate;
use crate::discover::FleetDiscovery;
use crate::migrate::{CommandSearchReplace, MigrationOrchestrator};
use crate::report;
use crate::resolver::SiteResolver;
use crate::store::{MySqlTenantStore, TableNames, TenantStore};

/// Owns the frozen configuration and the datastore handle; each subcommand
/// builds its pipeline from these.
pub struct App {
    config: RunConfig,
    store: Arc<dyn TenantStore>,
}

impl App {
    /// Connect to the datastore and verify the multi-tenant precondition
    /// before any command logic runs.
    pub async fn connect(config: RunConfig) -> Result<Self> {
        let store = MySqlTenantStore::connect(&config)
            .await
            .context("Failed to connect to the tenant datastore")?;

        let app = Self {
            config,
            store: Arc::new(store),
        };

        if !app.store.is_multi_tenant().await? {
            bail!("This is not a multi-tenant install");
        }

        Ok(app)
    }

    /// Resolve the site specifier and run the three migration stages over
    /// the resolved batch.
    pub async fn migrate(&self, site_spec: &str) -> Result<()> {
        let resolver = SiteResolver::new(self.store.clone(), self.config.root_domain.clone());
        let resolution = resolver.resolve(site_spec).await?;

        for skipped in &resolution.skipped {
            warn!("Skipping '{}': {}", skipped.token, skipped.reason);
        }
        info!("Resolved {} site(s)", resolution.resolved.len());

        let orchestrator = MigrationOrchestrator::new(
            Arc::new(CommandSearchReplace::new(
                self.config.search_replace_command.clone(),
                self.config.command_timeout_secs,
            )),
            AssetRewriter::new(self.config.asset_root.clone(), self.config.dry_run),
            Arc::new(TerminalGate::new()),
            TableNames::new(&self.config.table_prefix)?,
            self.config.root_url_override.clone(),
            self.config.dry_run,
        );

        let report = orchestrator.migrate(&resolution.resolved).await?;

        println!("{}", report.summary());
        for entry in &report.sites {
            println!("- tenant {} ({})", entry.site.id, entry.site.domain);
            println!("    content: {}", describe(&entry.content_rewrite));
            println!("    assets:  {}", describe(&entry.asset_rewrite));
            println!("    cert:    {}", describe(&entry.certificate));
        }

        if let OutputTarget::File(_) = self.config.output {
            report::write_json(&report, &self.config.output).await?;
        }

        Ok(())
    }

    /// Run fleet discovery and deliver the contact report to the configured
    /// destination.
    pub async fn contact_report(&self) -> Result<()> {
        let discovery = FleetDiscovery::new(
            self.store.clone(),
            TableNames::new(&self.config.table_prefix)?,
            ReportCache::new(&self.config.data_dir, &self.config.fingerprint()),
            self.config.dry_run,
            true,
        );

        let report = discovery.discover().await?;

        if report.is_empty() {
            println!("No tenants with protected content on mapped domains.");
            return Ok(());
        }

        report::write_json(&report, &self.config.output).await?;
        info!("{} record(s) in the fleet report", report.len());

        Ok(())
    }
}

fn describe(outcome: &Option<crate::migrate::StageOutcome>) -> String {
    match outcome {
        Some(outcome) => outcome.to_string(),
        None => "not run".to_string(),
    }
}
