//! Application path management for portable and installed modes.
//!
//! ## Mode Detection
//!
//! - **Portable mode**: if a `.portable` marker file exists next to the
//!   executable, `config.yaml`, `preferences.yaml` and `logs/` live in the
//!   same directory.
//! - **Installed mode** (default): everything lives in the platform config
//!   directory (`~/.config/deej` on Linux, `%APPDATA%\deej` on Windows).

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name used in installed mode
const APP_NAME: &str = "deej";

const CONFIG_FILE: &str = "config.yaml";
const INTERNAL_CONFIG_FILE: &str = "preferences.yaml";
const EXAMPLE_CONFIG_FILE: &str = "config.example.yaml";
const LOGS_DIR: &str = "logs";

/// Where the user config, the internal config and logs live
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// User-edited configuration
    pub config: PathBuf,
    /// App-managed mapping additions, merged after the user's
    pub internal_config: PathBuf,
    pub logs_dir: PathBuf,
    pub is_portable: bool,
}

impl AppPaths {
    /// Lay out all paths under one directory
    pub fn in_dir(dir: &Path, is_portable: bool) -> Self {
        Self {
            config: dir.join(CONFIG_FILE),
            internal_config: dir.join(INTERNAL_CONFIG_FILE),
            logs_dir: dir.join(LOGS_DIR),
            is_portable,
        }
    }

    /// Detect the appropriate paths based on environment.
    ///
    /// In debug builds a `config.yaml` in the current directory wins, so
    /// `cargo run` picks up the checkout's config.
    ///
    /// Called before logging is initialized, hence `eprintln!`.
    pub fn detect() -> Self {
        let exe_dir = exe_dir();

        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join(CONFIG_FILE).exists() {
                eprintln!("[paths] Running in DEV mode (config.yaml found in cwd: {})", cwd.display());
                return Self::in_dir(&cwd, true);
            }
        }

        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::in_dir(&exe_dir, true);
        }

        let app_dir = dirs::config_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: dirs::config_dir() returned None, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_NAME);

        #[cfg(debug_assertions)]
        eprintln!("[paths] Running in INSTALLED mode (config dir: {})", app_dir.display());

        Self::in_dir(&app_dir, false)
    }

    /// Directory holding the config file
    pub fn base_dir(&self) -> PathBuf {
        self.config
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Create the logs and config directories; seed the config in installed mode
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir)
                .with_context(|| format!("Failed to create {}", self.logs_dir.display()))?;
        }

        if !self.is_portable {
            let base = self.base_dir();
            if !base.exists() {
                debug!("Creating config directory: {}", base.display());
                std::fs::create_dir_all(&base)
                    .with_context(|| format!("Failed to create {}", base.display()))?;
            }

            if !self.config.exists() {
                self.seed_config(&[exe_dir(), PathBuf::from(".")])?;
            }
        }

        Ok(())
    }

    /// Copy the first `config.example.yaml` found in `search_dirs`
    fn seed_config(&self, search_dirs: &[PathBuf]) -> anyhow::Result<()> {
        for dir in search_dirs {
            let example = dir.join(EXAMPLE_CONFIG_FILE);
            if example.exists() {
                info!("Copying example config to {}", self.config.display());
                std::fs::copy(&example, &self.config).with_context(|| {
                    format!(
                        "Failed to copy example config from {} to {}",
                        example.display(),
                        self.config.display()
                    )
                })?;
                return Ok(());
            }
        }

        info!("No config found, please create {}", self.config.display());
        Ok(())
    }
}

fn exe_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let paths = AppPaths::in_dir(Path::new("/opt/deej"), true);
        assert_eq!(paths.config, PathBuf::from("/opt/deej/config.yaml"));
        assert_eq!(paths.internal_config, PathBuf::from("/opt/deej/preferences.yaml"));
        assert_eq!(paths.logs_dir, PathBuf::from("/opt/deej/logs"));
        assert_eq!(paths.base_dir(), PathBuf::from("/opt/deej"));
    }

    #[test]
    fn test_installed_mode_seeds_config() -> anyhow::Result<()> {
        let install = TempDir::new()?;
        let share = TempDir::new()?;
        std::fs::write(share.path().join(EXAMPLE_CONFIG_FILE), "slider_mapping:\n  0: master\n")?;

        let paths = AppPaths::in_dir(&install.path().join("deej"), false);
        std::fs::create_dir_all(paths.base_dir())?;
        paths.seed_config(&[share.path().to_path_buf()])?;

        assert!(paths.config.exists());
        assert_eq!(std::fs::read_to_string(&paths.config)?, "slider_mapping:\n  0: master\n");
        Ok(())
    }

    #[test]
    fn test_ensure_directories_portable() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let paths = AppPaths::in_dir(dir.path(), true);
        paths.ensure_directories()?;

        assert!(paths.logs_dir.is_dir());
        assert!(!paths.config.exists());
        Ok(())
    }
}
