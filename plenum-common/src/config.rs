//! Configuration loading and root folder resolution
//!
//! The root folder holds the service database (`plenum.db`) and is resolved
//! with a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. `PLENUM_ROOT` environment variable
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use std::path::{Path, PathBuf};

const ROOT_ENV_VAR: &str = "PLENUM_ROOT";
const DATABASE_FILE: &str = "plenum.db";

/// Resolves the service root folder following the priority order above.
pub struct RootFolderResolver {
    cli_arg: Option<String>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<String>) -> Self {
        Self { cli_arg }
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return PathBuf::from(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
            return PathBuf::from(path);
        }

        // Priority 3: TOML config file
        if let Ok(config_path) = find_config_file() {
            if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
                if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                    if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                        return PathBuf::from(root_folder);
                    }
                }
            }
        }

        // Priority 4: OS-dependent compiled default
        default_root_folder()
    }
}

/// Creates the root folder on first run and exposes derived paths.
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Create the root folder directory if it does not yet exist.
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            tracing::info!("Created root folder: {}", self.root.display());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }
}

/// Get the configuration file path for the platform
fn find_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/plenum/config.toml first, then /etc/plenum/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("plenum").join("config.toml")) {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/plenum/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        Err(Error::Config("No config file found".to_string()))
    } else {
        let path = dirs::config_dir()
            .map(|d| d.join("plenum").join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Config(format!("Config file not found: {:?}", path)))
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("plenum"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/plenum"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("plenum"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/plenum"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("plenum"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\plenum"))
    } else {
        PathBuf::from("./plenum_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arg_takes_priority() {
        let resolver = RootFolderResolver::new(Some("/tmp/plenum-test".to_string()));
        assert_eq!(resolver.resolve(), PathBuf::from("/tmp/plenum-test"));
    }

    #[test]
    fn database_path_is_under_root() {
        let init = RootFolderInitializer::new(PathBuf::from("/tmp/plenum-test"));
        assert_eq!(
            init.database_path(),
            PathBuf::from("/tmp/plenum-test/plenum.db")
        );
    }
}
