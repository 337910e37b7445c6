//! Infrastructure implementation of the `PipelineRunStore` port.
//!
//! `JsonRunStore` keeps one JSON file per instance and writes it atomically
//! (a `NamedTempFile` persisted over the old record) from `spawn_blocking`, so a crash mid-write leaves
//! the previous record intact.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::PipelineRunStore;
use crate::domain::PipelineRun;
use crate::domain::instance::validate_instance_name;

pub struct JsonRunStore {
    dir: PathBuf,
}

impl JsonRunStore {
    /// Store rooted at `~/.bulwark/runs`.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self> {
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(Self::with_dir(home.join(".bulwark").join("runs")))
    }

    /// Store rooted at `dir` (used in tests).
    #[must_use]
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(dir: &Path, instance: &str) -> Result<PathBuf> {
        validate_instance_name(instance)?;
        Ok(dir.join(format!("{instance}.json")))
    }

    fn load_sync(dir: &Path, instance: &str) -> Result<Option<PipelineRun>> {
        let path = Self::path_for(dir, instance)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading run record {}", path.display()))?;
        let run: PipelineRun = serde_json::from_str(&content)
            .with_context(|| format!("parsing run record {}", path.display()))?;
        Ok(Some(run))
    }

    fn save_sync(dir: &Path, run: &PipelineRun) -> Result<()> {
        let path = Self::path_for(dir, &run.instance)?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating directory {}", dir.display()))?;
        let content = serde_json::to_string_pretty(run).context("serializing run record")?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        temp.write_all(content.as_bytes())
            .with_context(|| format!("writing temp file {}", temp.path().display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("setting permissions on {}", temp.path().display()))?;
        }

        temp.persist(&path)
            .with_context(|| format!("finalizing run record {}", path.display()))?;
        Ok(())
    }
}

impl PipelineRunStore for JsonRunStore {
    async fn load_async(&self, instance: &str) -> Result<Option<PipelineRun>> {
        let dir = self.dir.clone();
        let instance = instance.to_string();
        tokio::task::spawn_blocking(move || Self::load_sync(&dir, &instance))
            .await
            .context("run load task panicked")?
    }

    async fn save_async(&self, run: &PipelineRun) -> Result<()> {
        let dir = self.dir.clone();
        let run = run.clone();
        tokio::task::spawn_blocking(move || Self::save_sync(&dir, &run))
            .await
            .context("run save task panicked")?
    }
}
