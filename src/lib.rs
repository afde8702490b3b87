pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{SyncConfig, SyncSettings};
pub use core::{CompareConfig, SyncEngine, SyncReport, SyncScheduler, SyncStatus};
pub use error::{ConfigError, StorageError, SyncError};

/// 应用名，用于配置目录
pub const APP_NAME: &str = "dirmirror";

pub mod dirs {
    use std::path::PathBuf;

    pub fn config_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else if cfg!(target_os = "macos") {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
        } else {
            // Linux
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".config"))
                })
        }
    }

    /// 默认配置目录，取不到用户目录时退回当前目录下的隐藏目录
    pub fn default_app_dir() -> PathBuf {
        config_dir()
            .map(|p| p.join(super::APP_NAME))
            .unwrap_or_else(|| PathBuf::from(format!(".{}", super::APP_NAME)))
    }
}
