//! Customer installation data.
//!
//! Each deployment has a service-account file (`<customer>.sa.json`) next
//! to the operator, and a values file published in a per-customer bucket.
//! The service-account path doubles as the credential argument handed to
//! the installation script.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::fetch::{CancelToken, Fetcher};
use crate::util::join_with_oxford_commas;
use crate::{Result, ShiprError};

const SERVICE_ACCOUNT_SUFFIX: &str = ".sa.json";

lazy_static! {
    static ref DOMAIN_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9][-_.a-zA-Z0-9]{0,61}[a-zA-Z0-9]\.[a-zA-Z]{2,13}$").unwrap();
    // Not RFC compliant, but good enough for catching pasted garbage.
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$").unwrap();
}

/// Resolved pointers to one customer's installation data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationData {
    pub service_account: PathBuf,
    pub bucket: String,
    pub values_blob: String,
}

impl InstallationData {
    /// Resolve from an explicit service-account path.
    pub fn from_service_account(service_account: PathBuf) -> Result<Self> {
        let name = service_account
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = match name.strip_suffix(SERVICE_ACCOUNT_SUFFIX) {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => {
                return Err(ShiprError::InstallationData(format!(
                    "{} is not a service account file",
                    service_account.display()
                )))
            }
        };
        if service_account.is_file() {
            let content = std::fs::read_to_string(&service_account)?;
            serde_json::from_str::<serde_json::Value>(&content).map_err(|e| {
                ShiprError::InstallationData(format!(
                    "{} is not valid JSON: {}",
                    service_account.display(),
                    e
                ))
            })?;
        }
        Ok(Self {
            service_account,
            bucket: format!("nimbus-customer-{}", stem),
            values_blob: format!("{}-values.yaml", stem),
        })
    }

    /// Discover the single `*.sa.json` file in `dir`. Zero or several
    /// candidates is a credential-resolution failure.
    pub fn discover(dir: &Path) -> Result<Self> {
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .map(|n| n.to_string_lossy().ends_with(SERVICE_ACCOUNT_SUFFIX))
                        .unwrap_or(false)
            })
            .collect();
        candidates.sort();

        match candidates.len() {
            1 => Self::from_service_account(candidates.remove(0)),
            0 => Err(ShiprError::InstallationData(
                "No service account file found".to_string(),
            )),
            _ => {
                let names: Vec<String> = candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect();
                Err(ShiprError::InstallationData(format!(
                    "Too many service account files found: {}",
                    join_with_oxford_commas(&names)
                )))
            }
        }
    }

    /// Public HTTPS endpoint of the values blob.
    pub fn values_url(&self) -> String {
        format!(
            "https://storage.googleapis.com/{}/{}",
            self.bucket, self.values_blob
        )
    }

    /// Fetch the values file into `dest_dir`, overwriting (after backup) any
    /// previous copy. Failures are logged and reported as `false`.
    pub async fn fetch_values(
        &self,
        fetcher: &Fetcher,
        dest_dir: &Path,
        cancel: &CancelToken,
    ) -> bool {
        match fetcher.fetch_one(&self.values_url(), dest_dir, cancel).await {
            Ok(_) => {
                log::info!("Downloaded {} from {}", self.values_blob, self.bucket);
                true
            }
            Err(e) => {
                log::error!("Installation data {} not found: {}", self.values_blob, e);
                false
            }
        }
    }
}

/// The values file shape the installer script expects.
#[derive(Debug, Deserialize)]
pub struct InstallationValues {
    #[serde(rename = "NIMBUS_COMPANY_NAME")]
    pub company_name: String,
    #[serde(rename = "NIMBUS_DOMAIN")]
    pub domain: String,
    #[serde(rename = "NIMBUS_ADMIN_EMAIL")]
    pub admin_email: String,
    #[serde(rename = "DEPLOYMENT_ID")]
    pub deployment_id: String,
    #[serde(rename = "LICENSE_SERVER_SECRET")]
    pub license_server_secret: String,
    #[serde(rename = "HELM_USERNAME")]
    pub helm_username: String,
    #[serde(rename = "HELM_PASSWORD")]
    pub helm_password: String,
    #[serde(rename = "type")]
    pub deployment_type: String,
}

impl InstallationValues {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let values: InstallationValues = serde_yaml_ng::from_str(&content)
            .map_err(|e| ShiprError::InvalidValues(e.to_string()))?;
        values.validate()?;
        Ok(values)
    }

    /// Field-level validation beyond what deserialization enforces.
    pub fn validate(&self) -> Result<()> {
        if self.company_name.is_empty() {
            return Err(ShiprError::InvalidValues(
                "NIMBUS_COMPANY_NAME must not be empty".to_string(),
            ));
        }
        if !DOMAIN_RE.is_match(&self.domain) {
            return Err(ShiprError::InvalidValues(format!(
                "NIMBUS_DOMAIN {:?} is not a domain",
                self.domain
            )));
        }
        if !EMAIL_RE.is_match(&self.admin_email) {
            return Err(ShiprError::InvalidValues(format!(
                "NIMBUS_ADMIN_EMAIL {:?} is not an email address",
                self.admin_email
            )));
        }
        if self.license_server_secret.len() < 64 {
            return Err(ShiprError::InvalidValues(
                "LICENSE_SERVER_SECRET is too short".to_string(),
            ));
        }
        if self.helm_password.len() < 23 {
            return Err(ShiprError::InvalidValues(
                "HELM_PASSWORD is too short".to_string(),
            ));
        }
        match self.deployment_type.as_str() {
            "core" | "full" | "gateway" => Ok(()),
            other => Err(ShiprError::InvalidValues(format!(
                "unknown deployment type {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn valid_yaml() -> String {
        [
            "NIMBUS_COMPANY_NAME: \"Acme Rockets\"",
            "NIMBUS_DOMAIN: \"acme.example.com\"",
            "NIMBUS_ADMIN_EMAIL: \"ops@acme.example.com\"",
            "DEPLOYMENT_ID: \"acme-prod-eu\"",
            &format!("LICENSE_SERVER_SECRET: \"{}\"", "s".repeat(64)),
            "HELM_USERNAME: \"acme\"",
            &format!("HELM_PASSWORD: \"{}\"", "p".repeat(23)),
            "type: \"core\"",
        ]
        .join("\n")
    }

    #[test]
    fn test_bucket_and_blob_derivation() {
        let data =
            InstallationData::from_service_account(PathBuf::from("/work/acme.sa.json")).unwrap();
        assert_eq!(data.bucket, "nimbus-customer-acme");
        assert_eq!(data.values_blob, "acme-values.yaml");
        assert_eq!(
            data.values_url(),
            "https://storage.googleapis.com/nimbus-customer-acme/acme-values.yaml"
        );
    }

    #[test]
    fn test_rejects_non_service_account_path() {
        assert!(InstallationData::from_service_account(PathBuf::from("/work/acme.json")).is_err());
        assert!(InstallationData::from_service_account(PathBuf::from("/work/.sa.json")).is_err());
    }

    #[test]
    fn test_rejects_malformed_service_account_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acme.sa.json");
        fs::write(&path, "{not json").unwrap();

        assert!(InstallationData::from_service_account(path).is_err());
    }

    #[test]
    fn test_discover_single_candidate() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("acme.sa.json"), "{}").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "x").unwrap();

        let data = InstallationData::discover(dir.path()).unwrap();
        assert_eq!(data.bucket, "nimbus-customer-acme");
    }

    #[test]
    fn test_discover_none_fails() {
        let dir = TempDir::new().unwrap();
        assert!(InstallationData::discover(dir.path()).is_err());
    }

    #[test]
    fn test_discover_many_fails_with_oxford_commas() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.sa.json"), "{}").unwrap();
        fs::write(dir.path().join("b.sa.json"), "{}").unwrap();

        let err = InstallationData::discover(dir.path()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Too many"));
        assert!(message.contains(", and "));
    }

    #[test]
    fn test_values_happy_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acme-values.yaml");
        fs::write(&path, valid_yaml()).unwrap();

        let values = InstallationValues::load(&path).unwrap();
        assert_eq!(values.company_name, "Acme Rockets");
        assert_eq!(values.deployment_type, "core");
    }

    #[test]
    fn test_values_missing_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acme-values.yaml");
        fs::write(&path, "NIMBUS_COMPANY_NAME: Acme\n").unwrap();

        assert!(InstallationValues::load(&path).is_err());
    }

    #[test]
    fn test_values_bad_domain_and_email() {
        let bad_domain = valid_yaml().replace("acme.example.com\"\nNIMBUS_ADMIN", "not a domain\"\nNIMBUS_ADMIN");
        let parsed: InstallationValues = serde_yaml_ng::from_str(&bad_domain).unwrap();
        assert!(parsed.validate().is_err());

        let bad_email = valid_yaml().replace("ops@acme.example.com", "ops-at-acme");
        let parsed: InstallationValues = serde_yaml_ng::from_str(&bad_email).unwrap();
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn test_values_short_secret() {
        let short = valid_yaml().replace(&"s".repeat(64), "short");
        let parsed: InstallationValues = serde_yaml_ng::from_str(&short).unwrap();
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn test_values_unknown_type() {
        let odd = valid_yaml().replace("type: \"core\"", "type: \"mainframe\"");
        let parsed: InstallationValues = serde_yaml_ng::from_str(&odd).unwrap();
        assert!(parsed.validate().is_err());
    }
}
