//! Trust anchor handling on top of the host GnuPG installation.
//!
//! Signature checking is delegated to the `gpg` binary; this module only
//! orchestrates it: importing the bundled release key into the local
//! keyring, pinning it by fingerprint, and mapping `--status-fd` output to
//! a [`VerifyOutcome`]. No cryptography is implemented here.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::{Result, ShiprError};

/// Fingerprint of the only acceptable signer of installation artifacts.
pub const PINNED_FINGERPRINT: &str = "D67D3474A7DA1CFF372C875973ED4894E736A093";

/// The armored public key matching [`PINNED_FINGERPRINT`], shipped inside
/// the binary so a fresh host can bootstrap its keyring offline.
pub const BUNDLED_PUBLIC_KEY: &str = include_str!("../../keys/nimbus-release-key.asc");

/// Verdict of one detached-signature check.
///
/// Only `Valid` ever permits an artifact to be trusted. `Indeterminate`
/// covers every state where the backend could not positively confirm the
/// signature (unknown status, missing key, tool error) and every gate in
/// this crate treats it exactly like `Bad`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid,
    Bad,
    Indeterminate,
}

impl VerifyOutcome {
    pub fn is_valid(self) -> bool {
        matches!(self, VerifyOutcome::Valid)
    }
}

/// Something that can check a detached signature over a file.
///
/// The production implementation is [`Keyring`]; tests substitute stubs so
/// verification paths can be exercised without a keyring.
pub trait SignatureBackend: Send + Sync {
    fn verify(&self, file: &Path, signature: &Path) -> Result<VerifyOutcome>;
}

/// The host GnuPG keyring.
///
/// Operations here mutate persistent host state. They are not synchronized;
/// callers must not use a `Keyring` from multiple threads at once.
pub struct Keyring {
    program: PathBuf,
    home: Option<PathBuf>,
}

impl Keyring {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("gpg"),
            home: None,
        }
    }

    /// Use an explicit GNUPGHOME instead of the user's default keyring.
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            program: PathBuf::from("gpg"),
            home: Some(home),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--batch");
        if let Some(home) = &self.home {
            cmd.env("GNUPGHOME", home);
        }
        cmd
    }

    /// True iff a key with the pinned fingerprint is in the local keyring.
    pub fn key_exists(&self) -> Result<bool> {
        let output = self
            .command()
            .args(["--with-colons", "--list-keys"])
            .output()?;
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(listing_has_fingerprint(&listing, PINNED_FINGERPRINT))
    }

    /// Import the bundled release key and mark it ultimately trusted.
    ///
    /// Returns true only when exactly one key was imported; zero or several
    /// imported keys is a failure, never a partial success. Callers should
    /// check [`Keyring::key_exists`] first to avoid redundant imports.
    pub fn import_pinned_key(&self) -> Result<bool> {
        let output = self.run_with_stdin(
            &["--status-fd", "1", "--import"],
            BUNDLED_PUBLIC_KEY.as_bytes(),
        )?;
        let status = String::from_utf8_lossy(&output.stdout);
        let imported = imported_fingerprints(&status);

        if imported.is_empty() && !output.status.success() {
            // gpg rejected the key material outright.
            return Err(ShiprError::Keyring(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        if imported.len() != 1 {
            log::error!("Could not import release key ({} imported)", imported.len());
            return Ok(false);
        }

        let fingerprint = &imported[0];
        log::info!("Release key imported: {}", spaced_fingerprint(fingerprint));
        self.trust_ultimately(fingerprint)?;
        log::info!("Key is set to trust ultimate");
        Ok(true)
    }

    fn trust_ultimately(&self, fingerprint: &str) -> Result<()> {
        let line = format!("{}:6:\n", fingerprint);
        let output = self.run_with_stdin(&["--import-ownertrust"], line.as_bytes())?;
        if !output.status.success() {
            return Err(ShiprError::Keyring(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    fn run_with_stdin(&self, args: &[&str], input: &[u8]) -> Result<Output> {
        let mut child = self
            .command()
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(input)?;
        }
        Ok(child.wait_with_output()?)
    }
}

impl Default for Keyring {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureBackend for Keyring {
    /// Check `signature` (detached) against `file`.
    fn verify(&self, file: &Path, signature: &Path) -> Result<VerifyOutcome> {
        let output = self
            .command()
            .args(["--status-fd", "1", "--verify"])
            .arg(signature)
            .arg(file)
            .output()?;
        let status = String::from_utf8_lossy(&output.stdout);
        let outcome = parse_verify_status(&status);
        match outcome {
            VerifyOutcome::Valid => log::info!("Signature of {} is good", file.display()),
            VerifyOutcome::Bad => log::error!("Signature of {} is bad", file.display()),
            VerifyOutcome::Indeterminate => log::error!(
                "Signature of {} could not be confirmed: {}",
                file.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        }
        Ok(outcome)
    }
}

/// Scan a `--with-colons` key listing for a fingerprint record.
fn listing_has_fingerprint(listing: &str, fingerprint: &str) -> bool {
    listing
        .lines()
        .filter(|line| line.starts_with("fpr:"))
        .filter_map(|line| line.split(':').nth(9))
        .any(|fpr| fpr == fingerprint)
}

/// Fingerprints of keys the import run actually accepted.
fn imported_fingerprints(status: &str) -> Vec<String> {
    status
        .lines()
        .filter_map(|line| line.strip_prefix("[GNUPG:] IMPORT_OK "))
        .filter_map(|rest| rest.split_whitespace().nth(1))
        .map(|fpr| fpr.to_string())
        .collect()
}

/// Map gpg `--status-fd` verify output to a verdict.
///
/// A reported bad signature wins over everything else. Only an explicit
/// good-signature status counts as valid; any unrecognized or missing
/// status is indeterminate rather than assumed good.
fn parse_verify_status(status: &str) -> VerifyOutcome {
    let mut good = false;
    for line in status.lines() {
        let Some(rest) = line.strip_prefix("[GNUPG:] ") else {
            continue;
        };
        let keyword = rest.split_whitespace().next().unwrap_or("");
        match keyword {
            "BADSIG" => return VerifyOutcome::Bad,
            "GOODSIG" | "VALIDSIG" => good = true,
            _ => {}
        }
    }
    if good {
        VerifyOutcome::Valid
    } else {
        VerifyOutcome::Indeterminate
    }
}

/// Render a fingerprint in four-character groups for log output.
fn spaced_fingerprint(fingerprint: &str) -> String {
    fingerprint
        .as_bytes()
        .chunks(4)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
