//! Subprocess adapter for the installer engine's command-line surface.
//!
//! The engine is the system under test and is only ever reached through its
//! CLI contract: `build`, `install`, `configure`, `validate` and the query
//! subcommands. Every invocation blocks until the subprocess exits; there is
//! no timeout or cancellation, so a hung engine blocks the calling worker.
//! That gap is deliberate and documented rather than silently inherited.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result};

use crate::util::format_command_line;

/// Outcome of one engine invocation. "The engine ran and reported failure"
/// and "the engine could not be launched at all" both reduce to a failed
/// action, but they are logged distinctly to aid diagnosis.
#[derive(Debug)]
pub enum InvokeOutcome {
    /// The engine ran to completion; `success` mirrors exit status zero.
    Completed { success: bool, stdout: Vec<u8> },
    /// The subprocess could not be spawned at all.
    LaunchFailed(std::io::Error),
}

impl InvokeOutcome {
    pub fn success(&self) -> bool {
        matches!(self, InvokeOutcome::Completed { success: true, .. })
    }
}

/// Handle to the engine binary under test.
#[derive(Debug, Clone)]
pub struct EngineRunner {
    binary: PathBuf,
}

impl EngineRunner {
    /// Resolves the engine binary. Bare names are looked up on `PATH`;
    /// anything with a path separator is used as given.
    pub fn new(binary: &Path) -> Result<Self> {
        let binary = if binary.components().count() > 1 {
            binary.to_path_buf()
        } else {
            which::which(binary)
                .with_context(|| format!("engine binary \"{}\" not found", binary.display()))?
        };
        Ok(Self { binary })
    }

    /// `build [--source-directory DIR] <manifest> <targetDir>`
    pub fn build_repository(
        &self,
        manifest: &Path,
        target: &Path,
        source_directory: Option<&Path>,
    ) -> InvokeOutcome {
        let mut args = vec!["build".to_string()];
        if let Some(dir) = source_directory {
            args.push("--source-directory".to_string());
            args.push(dir.display().to_string());
        }
        args.push(manifest.display().to_string());
        args.push(target.display().to_string());
        self.invoke(&args)
    }

    /// `install [--key K] <source> <target> <feature-id>...`
    pub fn install(
        &self,
        source: &Path,
        target: &Path,
        features: &[String],
        key: Option<&str>,
    ) -> InvokeOutcome {
        self.deploy("install", source, target, features, key)
    }

    /// `configure [--key K] <source> <target> <feature-id>...`
    pub fn configure(
        &self,
        source: &Path,
        target: &Path,
        features: &[String],
        key: Option<&str>,
    ) -> InvokeOutcome {
        self.deploy("configure", source, target, features, key)
    }

    /// `validate [--key K] <source> <target> --summary=false`; exit zero iff
    /// the target matches the source's expected state.
    pub fn validate(&self, source: &Path, target: &Path, key: Option<&str>) -> InvokeOutcome {
        let mut args = vec!["validate".to_string()];
        if let Some(key) = key {
            args.push("--key".to_string());
            args.push(key.to_string());
        }
        args.push(source.display().to_string());
        args.push(target.display().to_string());
        args.push("--summary=false".to_string());
        self.invoke(&args)
    }

    /// Runs a query subcommand and parses its newline-delimited stdout into
    /// a set of identifiers. `None` when the engine failed or could not run.
    pub fn query(&self, subcommand: &str, query_args: &[String], path: &Path) -> Option<BTreeSet<String>> {
        let mut args = vec![subcommand.to_string()];
        args.extend(query_args.iter().cloned());
        args.push(path.display().to_string());
        match self.invoke(&args) {
            InvokeOutcome::Completed {
                success: true,
                stdout,
            } => {
                let text = String::from_utf8_lossy(&stdout);
                Some(text.lines().map(str::to_string).collect())
            }
            _ => None,
        }
    }

    fn deploy(
        &self,
        action: &str,
        source: &Path,
        target: &Path,
        features: &[String],
        key: Option<&str>,
    ) -> InvokeOutcome {
        let mut args = vec![action.to_string()];
        if let Some(key) = key {
            args.push("--key".to_string());
            args.push(key.to_string());
        }
        args.push(source.display().to_string());
        args.push(target.display().to_string());
        args.extend(features.iter().cloned());
        self.invoke(&args)
    }

    fn invoke(&self, args: &[String]) -> InvokeOutcome {
        let command_line = format_command_line(&self.binary.display().to_string(), args);
        tracing::debug!(command = %command_line, "invoking engine");

        let result: std::io::Result<Output> = Command::new(&self.binary).args(args).output();
        match result {
            Ok(output) => {
                let success = output.status.success();
                if success {
                    tracing::debug!(status = ?output.status.code(), "engine completed");
                } else {
                    tracing::info!(
                        status = ?output.status.code(),
                        stderr = %String::from_utf8_lossy(&output.stderr),
                        "engine reported failure"
                    );
                }
                InvokeOutcome::Completed {
                    success,
                    stdout: output.stdout,
                }
            }
            Err(error) => {
                tracing::warn!(command = %command_line, %error, "failed to launch engine");
                InvokeOutcome::LaunchFailed(error)
            }
        }
    }
}
