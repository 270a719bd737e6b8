//! Per-scenario execution environment.
//!
//! Every scenario owns a freshly created working directory and an error log;
//! nothing is shared between scenarios, so isolation comes from disjoint
//! filesystem namespaces rather than synchronization.

use std::path::{Path, PathBuf};

use crate::engine::EngineRunner;

/// Exclusively-owned state for one scenario execution.
#[derive(Debug)]
pub struct TestEnvironment {
    /// Ephemeral working directory; all relative paths in actions resolve
    /// under this.
    test_dir: PathBuf,
    /// Directory holding the scenario script and its assets (manifests,
    /// source trees referenced by `generate-repository`).
    assets_dir: PathBuf,
    engine: EngineRunner,
    error_log: Vec<String>,
}

impl TestEnvironment {
    pub fn new(test_dir: PathBuf, assets_dir: PathBuf, engine: EngineRunner) -> Self {
        Self {
            test_dir,
            assets_dir,
            engine,
            error_log: Vec::new(),
        }
    }

    pub fn engine(&self) -> &EngineRunner {
        &self.engine
    }

    /// Resolves a script-relative path inside the working directory.
    pub fn work_path(&self, relative: &str) -> PathBuf {
        self.test_dir.join(relative)
    }

    /// Resolves a script-relative path inside the scenario assets directory.
    pub fn asset_path(&self, relative: &str) -> PathBuf {
        self.assets_dir.join(relative)
    }

    pub fn test_dir(&self) -> &Path {
        &self.test_dir
    }

    /// Records one line of expected-vs-actual detail for a failed action.
    pub fn log_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.error_log.push(message);
    }

    pub fn error_log(&self) -> &[String] {
        &self.error_log
    }
}
