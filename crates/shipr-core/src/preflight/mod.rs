//! Environment pre-flight checks.
//!
//! Checks are declarative goss files run by the goss binary. The runner
//! self-heals: when goss is absent from the search path or reports the
//! wrong version, the pinned release is fetched, made executable, and
//! linked under a stable name. Resolution is an explicit state machine
//! ([`ValidatorState`]) with the lookup behind a trait so tests can
//! simulate every branch without touching the real search path.

use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::artifact::ArtifactVerifier;
use crate::fetch::{take_backup, CancelToken};
use crate::trust::SignatureBackend;
use crate::{Result, ShiprError};

/// Release artifact name of the validator binary.
pub const GOSS_EXE: &str = "goss-linux-amd64";

/// The only goss release the pinned checksum matches.
pub const GOSS_VERSION: &str = "v0.3.16";

/// Where goss releases are published.
pub const GOSS_URL: &str = "https://github.com/goss-org/goss/releases/download";

/// Pinned SHA-256 digests for the validator binary and every check file
/// variant. A missing entry here is a hard lookup failure, including for
/// the Unknown OS placeholders.
const SHA256SUM: &[(&str, &str)] = &[
    (
        "goss-linux-amd64",
        "827e354b48f93bce933f5efcd1f00dc82569c42a179cf2d384b040d8a80bfbfb",
    ),
    (
        "goss-infrastructure-RHEL.yaml",
        "996fa7caf549a3759db22b9520641dfeae435f8713ff853f352148baecfffaaa",
    ),
    (
        "goss-infrastructure-Ubuntu.yaml",
        "91d0d11cf99699af5f6f3ef8d721c72cf1604673635502b4e2a561b4e2a26c1a",
    ),
    (
        "goss-infrastructure-Unknown.yaml",
        "0000000000000000000000000000000000000000000000000000000000000000",
    ),
    (
        "goss-security-RHEL.yaml",
        "ea8dbb67d51c5a2cd2ed4ee3f543fd15dbc7113ab9a1dbcadebbbb2bf1943dab",
    ),
    (
        "goss-security-Ubuntu.yaml",
        "0190c16355abe6e54a71aae49188644a18b1041cd95e0adf05f4d4be1508b2eb",
    ),
    (
        "goss-security-Unknown.yaml",
        "0000000000000000000000000000000000000000000000000000000000000000",
    ),
];

/// OS family a check-file variant applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Rhel,
    Ubuntu,
    Unknown,
}

impl OsFamily {
    /// Detect the host family from `/etc/os-release`.
    pub fn detect() -> Self {
        match std::fs::read_to_string("/etc/os-release") {
            Ok(content) => Self::from_os_release(&content),
            Err(_) => OsFamily::Unknown,
        }
    }

    /// Classify an os-release document by its `ID` and `ID_LIKE` fields.
    pub fn from_os_release(content: &str) -> Self {
        let mut haystack = String::new();
        for line in content.lines() {
            if let Some(value) = line
                .strip_prefix("ID=")
                .or_else(|| line.strip_prefix("ID_LIKE="))
            {
                haystack.push_str(&value.trim_matches('"').to_ascii_lowercase());
                haystack.push(' ');
            }
        }
        if haystack.contains("rhel") {
            OsFamily::Rhel
        } else if haystack.contains("ubuntu") {
            OsFamily::Ubuntu
        } else {
            OsFamily::Unknown
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OsFamily::Rhel => "RHEL",
            OsFamily::Ubuntu => "Ubuntu",
            OsFamily::Unknown => "Unknown",
        })
    }
}

/// Check categories the runner knows how to execute. Whether a failing
/// category blocks anything is the caller's policy, not ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Security,
    Infrastructure,
}

impl CheckKind {
    pub fn name(self) -> &'static str {
        match self {
            CheckKind::Security => "security",
            CheckKind::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resolution state of the validator binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorState {
    Unresolved,
    Provisioning,
    Ready(PathBuf),
}

/// Locates a validator binary and queries its version.
///
/// The production implementation scans `$PATH`; tests substitute stubs to
/// simulate "found correct version", "found wrong version", and "absent".
pub trait ValidatorLocator: Send + Sync {
    /// Find a validator candidate on the search path.
    fn locate(&self) -> Option<PathBuf>;

    /// Version output of a candidate binary.
    fn version_of(&self, bin: &Path) -> Result<String>;
}

/// `$PATH` scan for a binary named `goss`.
pub struct PathLocator;

impl ValidatorLocator for PathLocator {
    fn locate(&self) -> Option<PathBuf> {
        let path = std::env::var_os("PATH")?;
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join("goss");
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn version_of(&self, bin: &Path) -> Result<String> {
        let output = std::process::Command::new(bin).arg("--version").output()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Runs declarative environment checks with a self-provisioned validator.
pub struct PreFlight<B: SignatureBackend> {
    os: OsFamily,
    verifier: ArtifactVerifier<B>,
    bin_dir: PathBuf,
    work_dir: PathBuf,
    locator: Box<dyn ValidatorLocator>,
    state: ValidatorState,
    pins: Vec<(String, String)>,
    goss_url: String,
}

impl<B: SignatureBackend> PreFlight<B> {
    /// Build a runner for the detected OS family. The `~/bin` directory is
    /// created up front so provisioning always has somewhere to land.
    pub fn new(verifier: ArtifactVerifier<B>) -> Result<Self> {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| ShiprError::Provisioning("HOME is not set".to_string()))?;
        let bin_dir = home.join("bin");
        if !bin_dir.is_dir() {
            log::warn!("Creating directory {}", bin_dir.display());
            std::fs::create_dir_all(&bin_dir)?;
        }
        Ok(Self {
            os: OsFamily::detect(),
            verifier,
            bin_dir,
            work_dir: std::env::current_dir()?,
            locator: Box::new(PathLocator),
            state: ValidatorState::Unresolved,
            pins: SHA256SUM
                .iter()
                .map(|(name, sum)| (name.to_string(), sum.to_string()))
                .collect(),
            goss_url: GOSS_URL.to_string(),
        })
    }

    pub fn with_os(mut self, os: OsFamily) -> Self {
        self.os = os;
        self
    }

    pub fn with_bin_dir(mut self, bin_dir: PathBuf) -> Self {
        self.bin_dir = bin_dir;
        self
    }

    pub fn with_work_dir(mut self, work_dir: PathBuf) -> Self {
        self.work_dir = work_dir;
        self
    }

    pub fn with_locator(mut self, locator: Box<dyn ValidatorLocator>) -> Self {
        self.locator = locator;
        self
    }

    /// Replace the pinned digest table (tests).
    pub fn with_pins(mut self, pins: Vec<(String, String)>) -> Self {
        self.pins = pins;
        self
    }

    /// Override where validator releases are fetched from (tests, mirrors).
    pub fn with_goss_url(mut self, goss_url: &str) -> Self {
        self.goss_url = goss_url.trim_end_matches('/').to_string();
        self
    }

    pub fn os(&self) -> OsFamily {
        self.os
    }

    pub fn state(&self) -> &ValidatorState {
        &self.state
    }

    fn pinned(&self, name: &str) -> Result<&str> {
        self.pins
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, sum)| sum.as_str())
            .ok_or_else(|| ShiprError::UnknownArtifact {
                name: name.to_string(),
            })
    }

    /// Resolve the validator binary, provisioning it when the search path
    /// has none or the wrong release. The resolved path is cached for the
    /// lifetime of the runner.
    pub async fn validator(&mut self, cancel: &CancelToken) -> Result<PathBuf> {
        if let ValidatorState::Ready(path) = &self.state {
            return Ok(path.clone());
        }

        if let Some(found) = self.locator.locate() {
            match self.locator.version_of(&found) {
                Ok(version) if version.contains(GOSS_VERSION) => {
                    self.state = ValidatorState::Ready(found.clone());
                    return Ok(found);
                }
                Ok(version) => {
                    log::warn!(
                        "Validator version mismatch, wanted {} got {}",
                        GOSS_VERSION,
                        version.trim()
                    );
                }
                Err(e) => log::warn!("Could not query validator version: {}", e),
            }
        } else {
            log::warn!("Validator not found on search path");
        }

        self.provision(cancel).await
    }

    async fn provision(&mut self, cancel: &CancelToken) -> Result<PathBuf> {
        self.state = ValidatorState::Provisioning;

        let expected = self.pinned(GOSS_EXE)?.to_string();
        let dst = self.bin_dir.join(GOSS_EXE);
        let url = format!("{}/{}/{}", self.goss_url, GOSS_VERSION, GOSS_EXE);

        if !self.verifier.fetch_verified(&url, &dst, &expected, cancel).await {
            self.state = ValidatorState::Unresolved;
            return Err(ShiprError::Provisioning(format!(
                "could not fetch {} {}",
                GOSS_EXE, GOSS_VERSION
            )));
        }

        std::fs::set_permissions(&dst, std::fs::Permissions::from_mode(0o700))?;

        // Refresh the stable name so the operator can just run `goss`.
        let link = self.bin_dir.join("goss");
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        std::os::unix::fs::symlink(&dst, &link)?;

        log::info!("Provisioned validator at {}", dst.display());
        self.state = ValidatorState::Ready(dst.clone());
        Ok(dst)
    }

    /// Check file name for a category on this host.
    pub fn check_file_name(&self, kind: CheckKind) -> String {
        format!("goss-{}-{}.yaml", kind.name(), self.os)
    }

    async fn fetch_check_file(&self, kind: CheckKind, cancel: &CancelToken) -> Result<PathBuf> {
        let name = self.check_file_name(kind);
        // Always re-verified by hash, even when a copy is already on disk:
        // content drift between runs must be caught.
        let expected = self.pinned(&name)?.to_string();
        let dest = self.work_dir.join(&name);
        let url = format!("{}/{}", self.verifier.base_url(), name);
        if !self.verifier.fetch_verified(&url, &dest, &expected, cancel).await {
            return Err(ShiprError::Provisioning(format!(
                "check file {} failed verification",
                name
            )));
        }
        Ok(dest)
    }

    /// Run one check category and return the validator's exit code
    /// (0 = pass). A failing run leaves its full output in a timestamped
    /// log next to the check files.
    pub async fn run_check(&mut self, kind: CheckKind, cancel: &CancelToken) -> Result<i32> {
        let check = self.fetch_check_file(kind, cancel).await?;
        let goss = self.validator(cancel).await?;

        let output = tokio::process::Command::new(&goss)
            .arg("-g")
            .arg(&check)
            .args(["validate", "--format", "documentation", "--no-color"])
            .output()
            .await?;

        let code = output.status.code().unwrap_or(-1);
        if code == 0 {
            log::info!("{} checks passed", kind);
            return Ok(0);
        }

        log::warn!("Pre-flight {} checks failed with code {}", kind, code);
        let log_path = take_backup(&self.work_dir.join(format!("goss-{}.log", kind.name())))?;
        let mut report = output.stdout;
        report.extend_from_slice(&output.stderr);
        std::fs::write(&log_path, &report)?;
        Ok(code)
    }

    /// Advisory checks.
    pub async fn security(&mut self, cancel: &CancelToken) -> Result<i32> {
        self.run_check(CheckKind::Security, cancel).await
    }

    /// Mandatory checks.
    pub async fn infrastructure(&mut self, cancel: &CancelToken) -> Result<i32> {
        self.run_check(CheckKind::Infrastructure, cancel).await
    }
}
