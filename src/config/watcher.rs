//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{CanonicalConfig, ConfigLoader};

/// Debounce between a file event and re-reading the file
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Config watcher that monitors file changes and sends reload notifications
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<CanonicalConfig>,
}

impl ConfigWatcher {
    /// Create a new config watcher for the loader's files
    pub async fn new(loader: ConfigLoader) -> Result<(Self, Arc<CanonicalConfig>)> {
        let (tx, rx) = mpsc::channel(10);

        // Load initial config
        let initial_config = loader.load().await.context("Failed to load initial config")?;
        let initial_config = Arc::new(initial_config);

        let loader_clone = loader.clone();

        // notify callbacks run on their own OS thread, not in Tokio context
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        debug!("Config file modified: {:?}", event.paths);

                        let loader = loader_clone.clone();
                        let tx = tx.clone();

                        runtime_handle.spawn(async move {
                            // Debounce: wait a bit for file writes to complete
                            tokio::time::sleep(RELOAD_DEBOUNCE).await;

                            match loader.load().await {
                                Ok(new_config) => {
                                    info!(mapping = %new_config.slider_mapping, "Configuration reloaded");
                                    if let Err(e) = tx.send(new_config).await {
                                        error!("Failed to send config update: {}", e);
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to reload config (keeping old config): {:#}", e);
                                }
                            }
                        });
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(&loader.user_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", loader.user_path.display()))?;

        if let Some(internal_path) = loader.internal_path.as_ref().filter(|p| p.exists()) {
            if let Err(e) = watcher.watch(internal_path, RecursiveMode::NonRecursive) {
                warn!("Failed to watch internal config {}: {}", internal_path.display(), e);
            }
        }

        info!("Config file watcher started for: {}", loader.user_path.display());

        Ok((Self { _watcher: watcher, rx }, initial_config))
    }

    /// Wait for the next config update
    /// Returns None if the watcher has been closed
    pub async fn next_config(&mut self) -> Option<CanonicalConfig> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_watcher_basic() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(&config_path, "slider_mapping:\n  0: master\n")?;

        let loader = ConfigLoader::new(&config_path, None);
        let (mut watcher, config) = ConfigWatcher::new(loader).await?;

        assert_eq!(config.slider_mapping.get(0), Some(&["master".to_string()][..]));

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&config_path, "slider_mapping:\n  0: spotify\ninvert_sliders: true\n")?;

        // Wait for reload (with timeout)
        let new_config = tokio::time::timeout(Duration::from_secs(2), watcher.next_config())
            .await?
            .expect("reload delivered");

        assert_eq!(new_config.slider_mapping.get(0), Some(&["spotify".to_string()][..]));
        assert!(new_config.invert_sliders);

        Ok(())
    }
}
