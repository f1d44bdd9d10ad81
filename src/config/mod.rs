//! Configuration module
//!
//! Handles the persisted port and exchange settings

mod settings;

pub use settings::{AppConfig, ConfigError};

use directories::ProjectDirs;
use std::path::PathBuf;

const CONFIG_FILE: &str = "config.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "phonelink", "Phonelink")
}

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().to_path_buf())
}

/// Default location of `config.toml`
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE))
}

/// Default destination for downloaded elements
pub fn download_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("downloads"))
}

/// Initialize application directories
pub fn init_directories() -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    if let Some(dir) = download_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}
