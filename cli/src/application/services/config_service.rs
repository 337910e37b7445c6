//! Application service: configuration use-cases.

use anyhow::Result;
use tracing::info;

use crate::application::ports::ConfigStore;
use crate::domain::config::BulwarkConfig;

/// Load configuration.
pub fn load_config(store: &impl ConfigStore) -> Result<BulwarkConfig> {
    store.load()
}

/// Validate and persist one setting, returning the updated configuration.
///
/// # Errors
///
/// Returns an error if the key or value is invalid, or the file cannot be
/// read or written. Nothing is written on a validation error.
pub fn set_value(store: &impl ConfigStore, key: &str, value: &str) -> Result<BulwarkConfig> {
    let mut config = store.load()?;
    config.set(key, value)?;
    store.save(&config)?;
    info!(key, value, "configuration updated");
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;

    #[derive(Default)]
    struct MemoryConfigStore {
        saved: RefCell<Option<BulwarkConfig>>,
        saves: RefCell<u32>,
    }

    impl ConfigStore for MemoryConfigStore {
        fn load(&self) -> Result<BulwarkConfig> {
            Ok(self.saved.borrow().clone().unwrap_or_default())
        }

        fn save(&self, config: &BulwarkConfig) -> Result<()> {
            *self.saves.borrow_mut() += 1;
            *self.saved.borrow_mut() = Some(config.clone());
            Ok(())
        }

        fn path(&self) -> Result<PathBuf> {
            Ok(PathBuf::from("/tmp/bulwark.yaml"))
        }
    }

    #[test]
    fn test_set_value_persists() {
        let store = MemoryConfigStore::default();
        let config = set_value(&store, "concurrency", "8").unwrap();
        assert_eq!(config.concurrency, 8);
        assert_eq!(load_config(&store).unwrap().concurrency, 8);
    }

    #[test]
    fn test_set_value_rejects_without_writing() {
        let store = MemoryConfigStore::default();
        assert!(set_value(&store, "concurrency", "0").is_err());
        assert!(set_value(&store, "no.such.key", "1").is_err());
        assert_eq!(*store.saves.borrow(), 0);
    }
}
