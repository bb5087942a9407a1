// src/migrate.rs - Staged HTTPS migration over resolved sites
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assets::AssetRewriter;
use crate::confirm::ConfirmGate;
use crate::error::{FleetError, FleetResult};
use crate::resolver::ResolvedSite;
use crate::store::TableNames;
use crate::utils::shell;

/// Delegated search-and-replace over a tenant's table namespace. The
/// actual replacement engine is an external subcommand; this trait is the
/// seam the orchestrator drives it through.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchReplaceRunner: Send + Sync {
    /// Run one scoped replacement, returning the tool's raw output.
    async fn search_replace(
        &self,
        search: &str,
        replace: &str,
        table_pattern: &str,
        dry_run: bool,
    ) -> FleetResult<String>;
}

/// Subprocess-backed runner. The command template carries `{search}`,
/// `{replace}` and `{tables}` placeholders; dry runs append the tool's
/// own `--dry-run` flag.
pub struct CommandSearchReplace {
    template: String,
    timeout_secs: u64,
}

impl CommandSearchReplace {
    pub fn new(template: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            template: template.into(),
            timeout_secs,
        }
    }

    fn tool_name(&self) -> String {
        self.template
            .split_whitespace()
            .next()
            .unwrap_or("search-replace")
            .to_string()
    }
}

#[async_trait]
impl SearchReplaceRunner for CommandSearchReplace {
    async fn search_replace(
        &self,
        search: &str,
        replace: &str,
        table_pattern: &str,
        dry_run: bool,
    ) -> FleetResult<String> {
        let mut command = self
            .template
            .replace("{search}", search)
            .replace("{replace}", replace)
            .replace("{tables}", table_pattern);
        if dry_run {
            command.push_str(" --dry-run");
        }

        let output = shell::execute_command(&command, self.timeout_secs)
            .await
            .map_err(|e| FleetError::ExternalToolError {
                tool: self.tool_name(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FleetError::ExternalToolError {
                tool: self.tool_name(),
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Result of one stage for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    Completed { detail: String },
    Skipped { reason: String },
    Failed { error: String },
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageOutcome::Completed { detail } => write!(f, "completed ({})", detail),
            StageOutcome::Skipped { reason } => write!(f, "skipped ({})", reason),
            StageOutcome::Failed { error } => write!(f, "FAILED: {}", error),
        }
    }
}

/// Per-site stage outcomes, in stage order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteMigration {
    pub site: ResolvedSite,
    pub content_rewrite: Option<StageOutcome>,
    pub asset_rewrite: Option<StageOutcome>,
    pub certificate: Option<StageOutcome>,
}

impl SiteMigration {
    fn new(site: ResolvedSite) -> Self {
        Self {
            site,
            content_rewrite: None,
            asset_rewrite: None,
            certificate: None,
        }
    }

    fn stage_outcomes(&self) -> impl Iterator<Item = &StageOutcome> {
        self.content_rewrite
            .iter()
            .chain(self.asset_rewrite.iter())
            .chain(self.certificate.iter())
    }
}

/// Full report for one migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub sites: Vec<SiteMigration>,
}

impl MigrationReport {
    pub fn failed_stages(&self) -> usize {
        self.sites
            .iter()
            .flat_map(SiteMigration::stage_outcomes)
            .filter(|outcome| matches!(outcome, StageOutcome::Failed { .. }))
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} site(s) processed, {} stage failure(s){}",
            self.sites.len(),
            self.failed_stages(),
            if self.dry_run { " [dry run]" } else { "" }
        )
    }
}

/// Sequences the migration stages over a batch of resolved sites: content
/// rewrite for every site, then asset rewrite for every site, then the
/// gated certificate requests. One site's failure never halts the rest.
pub struct MigrationOrchestrator {
    runner: Arc<dyn SearchReplaceRunner>,
    assets: AssetRewriter,
    gate: Arc<dyn ConfirmGate>,
    tables: TableNames,
    root_url_override: Option<String>,
    dry_run: bool,
}

impl MigrationOrchestrator {
    pub fn new(
        runner: Arc<dyn SearchReplaceRunner>,
        assets: AssetRewriter,
        gate: Arc<dyn ConfirmGate>,
        tables: TableNames,
        root_url_override: Option<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            runner,
            assets,
            gate,
            tables,
            root_url_override,
            dry_run,
        }
    }

    pub async fn migrate(&self, sites: &[ResolvedSite]) -> FleetResult<MigrationReport> {
        if sites.is_empty() {
            return Err(FleetError::Precondition(
                "migration requires at least one resolved site".to_string(),
            ));
        }

        let mut report = MigrationReport {
            dry_run: self.dry_run,
            sites: sites.iter().cloned().map(SiteMigration::new).collect(),
        };

        info!("Content rewrite stage: {} site(s)", report.sites.len());
        for entry in &mut report.sites {
            let (search, replace) = self.rewrite_pair(&entry.site);
            let pattern = self.tables.tenant_pattern(entry.site.id);

            entry.content_rewrite = Some(
                match self
                    .runner
                    .search_replace(&search, &replace, &pattern, self.dry_run)
                    .await
                {
                    Ok(output) => StageOutcome::Completed {
                        detail: summarize_output(&output),
                    },
                    Err(e) => {
                        warn!("Content rewrite failed for tenant {}: {}", entry.site.id, e);
                        StageOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                },
            );
        }

        info!("Asset rewrite stage: {} site(s)", report.sites.len());
        for entry in &mut report.sites {
            let (search, replace) = self.rewrite_pair(&entry.site);

            entry.asset_rewrite = Some(
                match self
                    .assets
                    .rewrite_tenant(entry.site.id, &search, &replace)
                    .await
                {
                    Ok(outcome) if !outcome.directory_found => StageOutcome::Skipped {
                        reason: "no asset directory".to_string(),
                    },
                    Ok(outcome) => StageOutcome::Completed {
                        detail: format!(
                            "{} of {} file(s) rewritten",
                            outcome.files_changed, outcome.files_scanned
                        ),
                    },
                    Err(e) => {
                        warn!("Asset rewrite failed for tenant {}: {}", entry.site.id, e);
                        StageOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                },
            );
        }

        info!("Certificate request stage: {} site(s)", report.sites.len());
        for entry in &mut report.sites {
            entry.certificate = Some(if self.dry_run {
                StageOutcome::Skipped {
                    reason: "dry run".to_string(),
                }
            } else {
                let prompt = format!("Request a certificate for {}?", entry.site.domain);
                match self.gate.confirm(&prompt) {
                    Ok(true) => StageOutcome::Completed {
                        detail: format!("certificate request recorded for {}", entry.site.domain),
                    },
                    Ok(false) => StageOutcome::Skipped {
                        reason: "declined by operator".to_string(),
                    },
                    Err(e) => StageOutcome::Failed {
                        error: e.to_string(),
                    },
                }
            });
        }

        Ok(report)
    }

    /// The `http://` / `https://` pair for one site, honoring the
    /// root-url override when one was supplied.
    fn rewrite_pair(&self, site: &ResolvedSite) -> (String, String) {
        let domain = self
            .root_url_override
            .as_deref()
            .unwrap_or(site.domain.as_str());
        (format!("http://{}", domain), format!("https://{}", domain))
    }
}

fn summarize_output(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("ok")
        .to_string()
}
