// src/config.rs - Immutable per-invocation configuration
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{FleetError, FleetResult};
use crate::store;

/// Addressing mode for tenants: by subdomain (`tenant.root.tld`) or by
/// path (`root.tld/tenant`). Decides which lookup column is canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    Subdomain,
    Path,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::Subdomain => write!(f, "subdomain"),
            InstallMode::Path => write!(f, "path"),
        }
    }
}

/// Destination for a command's report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

/// On-disk configuration, merged with `SSLFLEET_` environment variables
/// and per-invocation CLI overrides before being frozen into a `RunConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "defaults::database_url")]
    pub database_url: String,

    #[serde(default = "defaults::root_domain")]
    pub root_domain: String,

    #[serde(default = "defaults::install_mode")]
    pub install_mode: InstallMode,

    #[serde(default = "defaults::table_prefix")]
    pub table_prefix: String,

    pub asset_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,

    #[serde(default = "defaults::search_replace_command")]
    pub search_replace_command: String,

    #[serde(default = "defaults::command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            database_url: defaults::database_url(),
            root_domain: defaults::root_domain(),
            install_mode: defaults::install_mode(),
            table_prefix: defaults::table_prefix(),
            asset_root: None,
            data_dir: None,
            search_replace_command: defaults::search_replace_command(),
            command_timeout_secs: defaults::command_timeout_secs(),
        }
    }
}

mod defaults {
    use super::InstallMode;

    pub fn database_url() -> String {
        "mysql://localhost/fleet".to_string()
    }

    pub fn root_domain() -> String {
        "localhost".to_string()
    }

    pub fn install_mode() -> InstallMode {
        InstallMode::Subdomain
    }

    pub fn table_prefix() -> String {
        "fleet_".to_string()
    }

    pub fn search_replace_command() -> String {
        "tenantctl search-replace {search} {replace} --tables={tables}".to_string()
    }

    pub fn command_timeout_secs() -> u64 {
        600
    }
}

/// Per-invocation flag overrides collected from the CLI surface.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub dry_run: bool,
    pub url: Option<String>,
    pub prefix: Option<String>,
    pub output: Option<PathBuf>,
}

/// Fully resolved configuration for one run. Built once in `main`, then
/// read-only everywhere; components receive it (or pieces of it) at
/// construction.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub database_url: String,
    pub root_domain: String,
    pub install_mode: InstallMode,
    pub table_prefix: String,
    pub asset_root: PathBuf,
    pub data_dir: PathBuf,
    pub search_replace_command: String,
    pub command_timeout_secs: u64,
    pub dry_run: bool,
    pub root_url_override: Option<String>,
    pub output: OutputTarget,
}

impl RunConfig {
    /// Load the configuration file (explicit path or the default location),
    /// apply environment and CLI overrides, and freeze the result.
    pub fn load(config_path: Option<&Path>, overrides: CliOverrides) -> Result<Self> {
        let file_path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);

        let mut file = if file_path.exists() {
            debug!("Loading config from: {}", file_path.display());
            let content = fs::read_to_string(&file_path)
                .context(format!("Failed to read config file: {}", file_path.display()))?;
            toml::from_str(&content)
                .context(format!("Failed to parse config file: {}", file_path.display()))?
        } else {
            debug!("Config file not found, using defaults");
            ConfigFile::default()
        };

        apply_environment_vars(&mut file);

        Self::from_parts(file, overrides).map_err(Into::into)
    }

    /// The default configuration location under the user's home directory.
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sslfleet/config.toml")
    }

    fn from_parts(file: ConfigFile, overrides: CliOverrides) -> FleetResult<Self> {
        let table_prefix = overrides.prefix.unwrap_or(file.table_prefix);
        store::validate_table_component(&table_prefix)?;

        let root_url_override = match overrides.url {
            Some(raw) => Some(normalize_root_url(&raw)?),
            None => None,
        };

        let data_dir = file.data_dir.unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".sslfleet/data")
        });

        let asset_root = file
            .asset_root
            .unwrap_or_else(|| PathBuf::from("/var/www/assets"));

        Ok(Self {
            database_url: file.database_url,
            root_domain: file.root_domain,
            install_mode: file.install_mode,
            table_prefix,
            asset_root,
            data_dir,
            search_replace_command: file.search_replace_command,
            command_timeout_secs: file.command_timeout_secs,
            dry_run: overrides.dry_run,
            root_url_override,
            output: match overrides.output {
                Some(path) => OutputTarget::File(path),
                None => OutputTarget::Stdout,
            },
        })
    }

    /// Cache key component tying cached reports to the configuration that
    /// produced them. Different prefixes or addressing modes never share a
    /// cache entry.
    pub fn fingerprint(&self) -> String {
        let sanitized: String = format!(
            "{}-{}-{}",
            self.table_prefix, self.install_mode, self.root_domain
        )
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
        sanitized
    }
}

/// Accept a root URL override as either a bare domain or a full URL and
/// reduce it to the host[/path] form used in rewrite pairs.
fn normalize_root_url(raw: &str) -> FleetResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FleetError::ConfigError("empty --url override".to_string()));
    }

    if trimmed.contains("://") {
        let url = Url::parse(trimmed)
            .map_err(|e| FleetError::ConfigError(format!("invalid --url override '{}': {}", trimmed, e)))?;
        let host = url
            .host_str()
            .ok_or_else(|| FleetError::ConfigError(format!("--url override '{}' has no host", trimmed)))?;
        let path = url.path().trim_end_matches('/');
        Ok(format!("{}{}", host, path))
    } else {
        Ok(trimmed.trim_matches('/').to_string())
    }
}

/// Environment variables override file values, `SSLFLEET_` prefix.
fn apply_environment_vars(config: &mut ConfigFile) {
    const ENV_PREFIX: &str = "SSLFLEET_";

    for (key, value) in std::env::vars() {
        let Some(config_key) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match config_key {
            "DATABASE_URL" => {
                config.database_url = value;
                debug!("Set database_url from environment");
            }
            "ROOT_DOMAIN" => {
                debug!("Set root_domain from environment: {}", value);
                config.root_domain = value;
            }
            "INSTALL_MODE" => match value.to_ascii_lowercase().as_str() {
                "subdomain" => config.install_mode = InstallMode::Subdomain,
                "path" => config.install_mode = InstallMode::Path,
                other => debug!("Ignoring unknown install mode from environment: {}", other),
            },
            "TABLE_PREFIX" => {
                debug!("Set table_prefix from environment: {}", value);
                config.table_prefix = value;
            }
            "DATA_DIR" => {
                config.data_dir = Some(PathBuf::from(value));
                debug!("Set data_dir from environment: {:?}", config.data_dir);
            }
            "ASSET_ROOT" => {
                config.asset_root = Some(PathBuf::from(value));
                debug!("Set asset_root from environment: {:?}", config.asset_root);
            }
            "COMMAND_TIMEOUT_SECS" => {
                if let Ok(secs) = value.parse::<u64>() {
                    config.command_timeout_secs = secs;
                    debug!("Set command_timeout_secs from environment: {}", secs);
                }
            }
            _ => {
                debug!("Unhandled environment variable: {}={}", key, value);
            }
        }
    }
}
