// src/report.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::OutputTarget;
use crate::error::{FleetError, FleetResult};
use crate::store::TenantId;

/// Externally reportable unit: one tenant confirmed to host protected
/// content on a mapped domain, with the addresses needed to contact its
/// administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub tenant_id: TenantId,
    pub canonical_url: String,
    pub mapped_domain: String,
    pub admin_email: String,
}

/// Ordered collection of contact records produced by one full discovery
/// pass. Recomputed wholesale on cache expiry, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetReport {
    pub generated_at: DateTime<Utc>,
    pub records: Vec<ContactRecord>,
}

impl FleetReport {
    pub fn new(records: Vec<ContactRecord>) -> Self {
        Self {
            generated_at: Utc::now(),
            records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Serialize a report to its destination as one pretty-printed JSON
/// document.
pub async fn write_json<T: Serialize>(value: &T, target: &OutputTarget) -> FleetResult<()> {
    let json = serde_json::to_string_pretty(value)?;

    match target {
        OutputTarget::Stdout => {
            println!("{}", json);
        }
        OutputTarget::File(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| FleetError::FileError {
                            path: parent.to_path_buf(),
                            message: format!("Failed to create output directory: {}", e),
                        })?;
                }
            }
            tokio::fs::write(path, json)
                .await
                .map_err(|e| FleetError::FileError {
                    path: path.clone(),
                    message: format!("Failed to write report: {}", e),
                })?;
            info!("Report written to {}", path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ContactRecord {
        ContactRecord {
            tenant_id: TenantId(7),
            canonical_url: "https://seven.example.org".to_string(),
            mapped_domain: "seven.example.com".to_string(),
            admin_email: "admin@seven.example.com".to_string(),
        }
    }

    #[test]
    fn tenant_id_serializes_as_a_bare_number() {
        let json = serde_json::to_value(sample_record()).unwrap();
        assert_eq!(json["tenant_id"], 7);
    }

    #[tokio::test]
    async fn file_output_is_a_single_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = FleetReport::new(vec![sample_record(), sample_record()]);

        write_json(&report, &OutputTarget::File(path.clone()))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: FleetReport = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.records.len(), 2);
    }
}
