//! Retrieval and verification of deployment artifacts.
//!
//! Two trust models live here. Scripts that will be executed need the full
//! chain: download script + detached signature, then ask the keyring for a
//! verdict. Supporting tools and check files carry a pinned SHA-256 instead,
//! which is cheaper and good enough for artifacts that are never executed
//! with credentials.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::fetch::{CancelToken, Fetcher};
use crate::trust::SignatureBackend;
use crate::{Result, ShiprError};

/// Fixed bucket all Nimbus installation artifacts are published to.
pub const NIMBUS_INSTALL_URL: &str = "https://storage.googleapis.com/nimbus-install";

/// The script bundles an operator can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Install,
    Debug,
    Backup,
}

impl ScriptKind {
    /// Artifact stem the bucket publishes this kind under.
    pub fn stem(self) -> &'static str {
        match self {
            ScriptKind::Install => "nimbus-install",
            ScriptKind::Debug => "nimbus-debug",
            ScriptKind::Backup => "backup-restore",
        }
    }

    pub fn script_name(self, version: &str) -> String {
        format!("{}-{}.sh", self.stem(), version)
    }

    pub fn signature_name(self, version: &str) -> String {
        format!("{}-{}.sig", self.stem(), version)
    }
}

impl std::fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.stem())
    }
}

/// Fetches artifacts and gates them on signature or checksum verdicts.
pub struct ArtifactVerifier<B: SignatureBackend> {
    fetcher: Fetcher,
    backend: Arc<B>,
    base_url: String,
    dest_dir: PathBuf,
}

impl<B: SignatureBackend> ArtifactVerifier<B> {
    /// Artifacts land in the current working directory by default.
    pub fn new(fetcher: Fetcher, backend: Arc<B>) -> Result<Self> {
        Ok(Self {
            fetcher,
            backend,
            base_url: NIMBUS_INSTALL_URL.to_string(),
            dest_dir: std::env::current_dir()?,
        })
    }

    /// Override the bucket URL (tests, mirrors).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Override where fetched artifacts land.
    pub fn with_dest_dir(mut self, dest_dir: PathBuf) -> Self {
        self.dest_dir = dest_dir;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The two URLs a bundle request resolves to: script, then signature.
    pub fn bundle_urls(&self, kind: ScriptKind, version: &str) -> (String, String) {
        (
            format!("{}/{}", self.base_url, kind.script_name(version)),
            format!("{}/{}", self.base_url, kind.signature_name(version)),
        )
    }

    /// Download a script and its detached signature, mark the script
    /// owner-executable, and return whether the keyring confirms it.
    ///
    /// Every failure on the way — network, filesystem, or an unconfirmed
    /// signature — is logged and reported as `false`, never re-raised.
    pub async fn get_script_bundle(
        &self,
        kind: ScriptKind,
        version: &str,
        cancel: &CancelToken,
    ) -> bool {
        match self.try_get_bundle(kind, version, cancel).await {
            Ok(valid) => valid,
            Err(e) => {
                log::error!("Could not fetch {} bundle: {}", kind, e);
                false
            }
        }
    }

    async fn try_get_bundle(
        &self,
        kind: ScriptKind,
        version: &str,
        cancel: &CancelToken,
    ) -> Result<bool> {
        let (script_url, signature_url) = self.bundle_urls(kind, version);
        self.fetcher
            .download_batch(&[script_url, signature_url], &self.dest_dir, cancel)
            .await?;

        let script = self.dest_dir.join(kind.script_name(version));
        let signature = self.dest_dir.join(kind.signature_name(version));

        // Owner-only rwx; the executable bit carries no trust.
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o700))?;

        Ok(self.backend.verify(&script, &signature)?.is_valid())
    }

    /// Download one artifact into `destination` and require its SHA-256 to
    /// match `expected_sha256` exactly. Mismatch or any fetch error is
    /// logged and reported as `false`.
    pub async fn fetch_verified(
        &self,
        url: &str,
        destination: &Path,
        expected_sha256: &str,
        cancel: &CancelToken,
    ) -> bool {
        let dest_dir = match destination.parent() {
            Some(parent) if parent != Path::new("") => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if let Err(e) = self.fetcher.fetch_one(url, &dest_dir, cancel).await {
            log::error!("Could not fetch {}: {}", url, e);
            return false;
        }
        match sha256_file(destination) {
            Ok(actual) if actual.eq_ignore_ascii_case(expected_sha256) => true,
            Ok(_) => {
                log::error!("Wrong hash for {}", destination.display());
                false
            }
            Err(e) => {
                log::error!("Could not hash {}: {}", destination.display(), e);
                false
            }
        }
    }
}

/// Hex SHA-256 of a file's content.
pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(ShiprError::Io)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}
