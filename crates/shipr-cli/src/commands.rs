//! Command orchestration: ties the key bootstrap, pre-flight checks, and
//! the download-verify-execute pipeline together and maps every outcome to
//! a process exit code.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use semver::Version;

use shipr_core::artifact::{ArtifactVerifier, ScriptKind};
use shipr_core::cli::{Output, ProgressManager};
use shipr_core::data::{InstallationData, InstallationValues};
use shipr_core::exec::{ConfirmPrompt, ConsoleSink, ScriptRunner, StaticAnswer, TtyPrompt};
use shipr_core::fetch::{CancelToken, Fetcher};
use shipr_core::http::HttpClient;
use shipr_core::preflight::PreFlight;
use shipr_core::release;
use shipr_core::trust::Keyring;

use crate::Args;

pub const EXIT_OK: i32 = 0;
pub const EXIT_OPERATION_FAILED: i32 = 1;
pub const EXIT_SCRIPT_FAILED: i32 = 2;
pub const EXIT_CREDENTIALS: i32 = 3;
pub const EXIT_INVALID_VALUES: i32 = 4;

/// Version strings are published with a `v` prefix.
fn script_version(version: &Version) -> String {
    format!("v{}", version)
}

struct App {
    http: Arc<HttpClient>,
    fetcher: Fetcher,
    keyring: Arc<Keyring>,
    output: Output,
    cancel: CancelToken,
    yes: bool,
    service_account: Option<PathBuf>,
}

impl App {
    fn new(args: &Args) -> Result<Self> {
        let http = Arc::new(HttpClient::new().context("Failed to build the HTTP client")?);
        let progress = Arc::new(ProgressManager::default());
        Ok(Self {
            http: Arc::clone(&http),
            fetcher: Fetcher::new(http, progress),
            keyring: Arc::new(Keyring::new()),
            output: Output::new(),
            cancel: CancelToken::new(),
            yes: args.yes,
            service_account: args.service_account.clone(),
        })
    }

    fn verifier(&self) -> Result<ArtifactVerifier<Keyring>> {
        ArtifactVerifier::new(self.fetcher.clone(), Arc::clone(&self.keyring))
            .context("Failed to set up the artifact verifier")
    }

    fn prompt(&self) -> Box<dyn ConfirmPrompt> {
        if self.yes {
            Box::new(StaticAnswer(true))
        } else {
            Box::new(TtyPrompt)
        }
    }

    /// Make sure the release key is in the keyring, importing it if needed.
    /// We cannot continue without it.
    fn ensure_signing_key(&self) -> bool {
        match self.keyring.key_exists() {
            Ok(true) => {
                self.output.info("Nimbus release key found, all is well.");
                true
            }
            Ok(false) => {
                self.output
                    .warning("Nimbus release key not found, attempting to import it");
                match self.keyring.import_pinned_key() {
                    Ok(true) => {
                        self.output.success("Nimbus release key imported.");
                        true
                    }
                    Ok(false) => {
                        self.output
                            .failure("Nimbus release key could not be imported.");
                        false
                    }
                    Err(e) => {
                        log::error!("Key import failed: {}", e);
                        self.output
                            .failure("Nimbus release key could not be imported.");
                        false
                    }
                }
            }
            Err(e) => {
                log::error!("Keyring lookup failed: {}", e);
                false
            }
        }
    }

    /// Run both check categories. Security findings are advisory only;
    /// failing infrastructure checks stop the installation.
    async fn pre_flight(&self) -> Result<bool> {
        let mut runner = PreFlight::new(self.verifier()?)?;

        if runner.security(&self.cancel).await? != 0 {
            self.output
                .warning("Pre-flight security checks failed. This is advisory only.");
        } else {
            self.output
                .success("Security pre-flight checks passed, all is well.");
        }

        if runner.infrastructure(&self.cancel).await? != 0 {
            self.output
                .failure("Pre-flight infrastructure checks failed. This is mandatory.");
            return Ok(false);
        }
        self.output
            .success("Infrastructure pre-flight checks passed, all is well.");
        Ok(true)
    }

    /// Resolve, fetch, and validate the customer installation data.
    /// Returns the credential path and the local values file.
    async fn installation_data(&self) -> Result<std::result::Result<(PathBuf, PathBuf), i32>> {
        let cwd = std::env::current_dir()?;
        let data = match &self.service_account {
            Some(path) => InstallationData::from_service_account(path.clone()),
            None => InstallationData::discover(&cwd),
        };
        let data = match data {
            Ok(data) => data,
            Err(e) => {
                log::error!("Credential resolution failed: {}", e);
                self.output.failure("Could not resolve a service account file.");
                return Ok(Err(EXIT_CREDENTIALS));
            }
        };

        if !data.fetch_values(&self.fetcher, &cwd, &self.cancel).await {
            self.output.failure("Could not fetch the installation data.");
            return Ok(Err(EXIT_OPERATION_FAILED));
        }

        let values_path = cwd.join(&data.values_blob);
        if let Err(e) = InstallationValues::load(&values_path) {
            log::error!("Installation data rejected: {}", e);
            self.output.failure("Installation data is invalid.");
            return Ok(Err(EXIT_INVALID_VALUES));
        }

        Ok(Ok((data.service_account, values_path)))
    }

    async fn execute(
        &self,
        kind: ScriptKind,
        version: &str,
        credential: Option<&str>,
        extra_args: &[String],
    ) -> Result<bool> {
        let runner = ScriptRunner::new(Arc::clone(&self.keyring))?;
        let mut sink = ConsoleSink::new(&format!("{}:", kind));
        runner
            .run(
                kind,
                version,
                credential,
                extra_args,
                self.prompt().as_ref(),
                &mut sink,
            )
            .await
            .map_err(Into::into)
    }

    async fn install(&self, version: &Version) -> Result<i32> {
        let version = script_version(version);
        self.output.info(&format!(
            "Downloading installation script at version {}",
            version
        ));

        if !self.ensure_signing_key() {
            self.output.failure("Operation failed.");
            return Ok(EXIT_OPERATION_FAILED);
        }

        let (service_account, values_path) = match self.installation_data().await? {
            Ok(paths) => paths,
            Err(code) => return Ok(code),
        };

        if !self.pre_flight().await? {
            self.output.failure("Operation failed.");
            return Ok(EXIT_OPERATION_FAILED);
        }

        if !self
            .verifier()?
            .get_script_bundle(ScriptKind::Install, &version, &self.cancel)
            .await
        {
            log::error!("Failure to get install script {}", version);
            self.output.failure("Operation failed.");
            return Ok(EXIT_OPERATION_FAILED);
        }

        let credential = service_account.display().to_string();
        let values = values_path.display().to_string();
        if !self
            .execute(ScriptKind::Install, &version, Some(&credential), &[values])
            .await?
        {
            log::error!("Failure to execute install script {}", version);
            self.output.failure("Installation script failed.");
            return Ok(EXIT_SCRIPT_FAILED);
        }

        Ok(EXIT_OK)
    }

    async fn debug(&self, version: &Version) -> Result<i32> {
        let version = script_version(version);
        self.output.info(&format!(
            "Downloading debugging script at version {}",
            version
        ));

        if !self.ensure_signing_key() {
            self.output.failure("Operation failed.");
            return Ok(EXIT_OPERATION_FAILED);
        }

        if !self
            .verifier()?
            .get_script_bundle(ScriptKind::Debug, &version, &self.cancel)
            .await
        {
            log::error!("Failure to get debug script {}", version);
            self.output.failure("Operation failed.");
            return Ok(EXIT_OPERATION_FAILED);
        }

        if !self.execute(ScriptKind::Debug, &version, None, &[]).await? {
            log::error!("Failure to execute debug script {}", version);
            self.output.failure("Debug script failed.");
            return Ok(EXIT_SCRIPT_FAILED);
        }

        Ok(EXIT_OK)
    }

    async fn backup(&self, version: &Version) -> Result<i32> {
        let version = script_version(version);
        self.output.info(&format!(
            "Downloading backup & restore script at version {}",
            version
        ));

        if !self.ensure_signing_key() {
            self.output.failure("Operation failed.");
            return Ok(EXIT_OPERATION_FAILED);
        }

        if !self
            .verifier()?
            .get_script_bundle(ScriptKind::Backup, &version, &self.cancel)
            .await
        {
            log::error!("Failure to get backup script {}", version);
            self.output.failure("Operation failed.");
            return Ok(EXIT_OPERATION_FAILED);
        }

        Ok(EXIT_OK)
    }

    /// Warn when a newer CLI release is published. Never fatal.
    async fn check_release(&self) {
        match release::latest_release(&self.http, shipr_core::NIMBUS_INSTALL_URL).await {
            Ok(latest) => {
                if !release::is_up_to_date(env!("CARGO_PKG_VERSION"), &latest) {
                    self.output.warning(&format!(
                        "A newer shipr release ({}) is available.",
                        latest
                    ));
                }
            }
            Err(e) => log::debug!("Release check skipped: {}", e),
        }
    }
}

pub async fn dispatch(args: Args) -> Result<i32> {
    let app = App::new(&args)?;

    // Interactive interrupts trip the batch token; in-flight transfers stop
    // at their next chunk boundary.
    let cancel = app.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::debug!("Interrupt received, cancelling transfers");
            cancel.cancel();
        }
    });

    app.output.section("Nimbus shipr");
    app.check_release().await;

    let code = if let Some(version) = &args.install {
        app.install(version).await?
    } else if let Some(version) = &args.debug {
        app.debug(version).await?
    } else if let Some(version) = &args.backup {
        app.backup(version).await?
    } else {
        app.output
            .warning("You must specify -i, -b, or -d and a semver version.");
        app.output.failure("Operation failed.");
        return Ok(EXIT_OPERATION_FAILED);
    };

    if code == EXIT_OK {
        app.output.success("Operation was successful.");
    }
    Ok(code)
}
