//! Supervised execution of verified deployment scripts.
//!
//! A script is only ever spawned after an interactive confirmation and a
//! fresh signature check: the window between fetch-time verification and
//! execution is treated as its own tampering threat. Output is streamed
//! line by line into a [`LineSink`] as it arrives, and the script's exit
//! code decides the overall verdict.

mod sink;

pub use sink::{classify, ConsoleSink, LineSink, Severity};

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::artifact::ScriptKind;
use crate::trust::SignatureBackend;
use crate::{Result, ShiprError};

/// Asks the operator to confirm an action.
///
/// The production implementation prompts on the terminal; automation and
/// tests substitute a fixed answer.
pub trait ConfirmPrompt: Send + Sync {
    fn confirm(&self, message: &str) -> Result<bool>;
}

/// Terminal confirmation via dialoguer.
pub struct TtyPrompt;

impl ConfirmPrompt for TtyPrompt {
    fn confirm(&self, message: &str) -> Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(message)
            .default(false)
            .interact()
            .map_err(|e| ShiprError::Prompt(e.to_string()))
    }
}

/// A fixed confirmation answer (`--yes` flows, tests).
pub struct StaticAnswer(pub bool);

impl ConfirmPrompt for StaticAnswer {
    fn confirm(&self, _message: &str) -> Result<bool> {
        Ok(self.0)
    }
}

/// Runs verified scripts and reports their outcome.
pub struct ScriptRunner<B: SignatureBackend> {
    backend: Arc<B>,
    work_dir: PathBuf,
}

impl<B: SignatureBackend> ScriptRunner<B> {
    /// Scripts are looked up in the current working directory by default.
    pub fn new(backend: Arc<B>) -> Result<Self> {
        Ok(Self {
            backend,
            work_dir: std::env::current_dir()?,
        })
    }

    pub fn with_work_dir(mut self, work_dir: PathBuf) -> Self {
        self.work_dir = work_dir;
        self
    }

    /// Execute the script for `kind` at `version` with
    /// `[credential_arg] + extra_args`.
    ///
    /// Declining the confirmation is a successful no-op: not running an
    /// unapproved script is exactly what was asked for. A signature that is
    /// not positively valid, a spawn failure, or a nonzero exit all report
    /// `false`; only the confirmation prompt itself can error.
    pub async fn run(
        &self,
        kind: ScriptKind,
        version: &str,
        credential_arg: Option<&str>,
        extra_args: &[String],
        prompt: &dyn ConfirmPrompt,
        sink: &mut dyn LineSink,
    ) -> Result<bool> {
        let script = self.work_dir.join(kind.script_name(version));
        let signature = self.work_dir.join(kind.signature_name(version));

        if !prompt.confirm(&format!(
            "Do you want to execute the {} script?",
            script.display()
        ))? {
            log::info!("User aborted");
            return Ok(true); // Nothing happened, therefore it is not an error.
        }

        // Verify the signature again: the copy on disk may have changed
        // since it was fetched.
        match self.backend.verify(&script, &signature) {
            Ok(outcome) if outcome.is_valid() => {}
            Ok(_) => {
                log::error!("Invalid signature for {}", script.display());
                return Ok(false);
            }
            Err(e) => {
                log::error!("Could not verify {}: {}", script.display(), e);
                return Ok(false);
            }
        }

        let mut args: Vec<String> = Vec::new();
        if let Some(credential) = credential_arg {
            args.push(credential.to_string());
        }
        args.extend_from_slice(extra_args);

        log::info!("Executing {} with {} arguments", script.display(), args.len());
        match self.supervise(&script, &args, sink).await {
            Ok(code) if code == 0 => {
                log::info!("Script {} exited with code 0", script.display());
                Ok(true)
            }
            Ok(code) => {
                log::error!("Script {} exited with code {}", script.display(), code);
                Ok(false)
            }
            Err(e) => {
                log::error!("Could not run {}: {}", script.display(), e);
                Ok(false)
            }
        }
    }

    /// Spawn the script, stream stdout through the sink as it arrives, then
    /// drain stderr and return the exit code.
    async fn supervise(
        &self,
        script: &std::path::Path,
        args: &[String],
        sink: &mut dyn LineSink,
    ) -> Result<i32> {
        let mut child = Command::new(script)
            .args(args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShiprError::Io(std::io::Error::other("child stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ShiprError::Io(std::io::Error::other("child stderr not captured")))?;

        // Drain stderr concurrently so a chatty script cannot dead-lock on a
        // full pipe while we read stdout.
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let severity = classify(&line);
            sink.line(severity, &line);
            log::info!("stdout: {}", line);
        }

        let status = child.wait().await?;
        let stderr_lines = stderr_task.await.unwrap_or_default();
        for line in &stderr_lines {
            sink.line(Severity::Error, &format!("stderr: {}", line));
            log::error!("stderr: {}", line);
        }

        Ok(status.code().unwrap_or(-1))
    }
}
