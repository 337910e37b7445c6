//! Infrastructure implementation of the `ConfigStore` port, plus loaders for
//! the YAML plan and profile documents the operator hands to the CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::application::ports::ConfigStore;
use crate::domain::config::BulwarkConfig;
use crate::domain::{DeploymentPlan, ProfileVariant};

/// Production implementation of `ConfigStore` that uses a YAML file on disk.
pub struct YamlConfigStore;

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<BulwarkConfig> {
        let path = self.path()?;
        if !path.exists() {
            return Ok(BulwarkConfig::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))
    }

    fn save(&self, config: &BulwarkConfig) -> Result<()> {
        let path = self.path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        let content = serde_yaml::to_string(config).context("cannot serialize config")?;
        std::fs::write(&path, content)
            .with_context(|| format!("cannot write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("cannot set permissions on {}", path.display()))?;
        }
        Ok(())
    }

    fn path(&self) -> Result<PathBuf> {
        if let Ok(val) = std::env::var("BULWARK_CONFIG") {
            return Ok(PathBuf::from(val));
        }
        let home =
            dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
        Ok(home.join(".bulwark").join("config.yaml"))
    }
}

/// Read a deployment plan document.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid plan.
/// Semantic checks happen later, in [`DeploymentPlan::resolve`].
pub fn load_plan(path: &Path) -> Result<DeploymentPlan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read plan {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("cannot parse plan {}", path.display()))
}

/// Read a standalone profile document.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid profile.
pub fn load_profile(path: &Path) -> Result<ProfileVariant> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read profile {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("cannot parse profile {}", path.display()))
}
