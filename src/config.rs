//! 应用配置模块

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 一次镜像任务的完整配置（由命令行参数解析而来）
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub source_path: PathBuf,
    pub replica_path: PathBuf,
    /// 同步间隔（秒），0 表示只运行一次
    pub interval_secs: u64,
    /// 清理阶段的最大并发删除数
    pub max_concurrent_deletes: usize,
}

impl SyncConfig {
    pub fn new(source_path: impl Into<PathBuf>, replica_path: impl Into<PathBuf>, interval_secs: u64) -> Self {
        Self {
            source_path: source_path.into(),
            replica_path: replica_path.into(),
            interval_secs,
            max_concurrent_deletes: default_max_concurrent_deletes(),
        }
    }

    /// 校验路径并转为绝对路径
    ///
    /// 源目录必须存在且是目录；副本路径可以不存在，但不能是普通文件；
    /// 两棵目录树不能互相包含。
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let source = absolute(&self.source_path)?;
        let replica = absolute(&self.replica_path)?;

        let source_meta = fs::metadata(&source).map_err(|_| ConfigError::SourceMissing {
            path: source.clone(),
        })?;
        if !source_meta.is_dir() {
            return Err(ConfigError::SourceNotDirectory { path: source });
        }

        if let Ok(meta) = fs::metadata(&replica) {
            if !meta.is_dir() {
                return Err(ConfigError::ReplicaIsFile { path: replica });
            }
        }

        // 解析符号链接后再比较，副本尚不存在时按字面路径比较
        let source_real = fs::canonicalize(&source).map_err(|e| ConfigError::InvalidPath {
            path: source.clone(),
            source: e,
        })?;
        let replica_real = fs::canonicalize(&replica).unwrap_or_else(|_| replica.clone());
        if replica_real.starts_with(&source_real) || source_real.starts_with(&replica_real) {
            return Err(ConfigError::OverlappingTrees {
                source_path: source,
                replica_path: replica,
            });
        }

        // 源目录使用解析后的真实路径，列举时不再跟随根目录链接
        self.source_path = source_real;
        self.replica_path = replica;
        Ok(self)
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|e| ConfigError::InvalidPath {
        path: path.to_path_buf(),
        source: e,
    })
}

/// 同步行为配置（config.json 的 sync 段）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    #[serde(default = "default_max_concurrent_deletes")]
    pub max_concurrent_deletes: usize,
}

fn default_max_concurrent_deletes() -> usize {
    8
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_concurrent_deletes: default_max_concurrent_deletes(),
        }
    }
}

impl SyncSettings {
    /// 从配置文件加载同步配置
    pub fn load(config_dir: &Path) -> Self {
        load_section(config_dir, "sync").unwrap_or_default()
    }

    /// 应用到任务配置上，并发数至少为 1
    pub fn apply(&self, config: &mut SyncConfig) {
        config.max_concurrent_deletes = self.max_concurrent_deletes.max(1);
    }
}

/// 读取 config.json 中的某一段，文件或段缺失、格式错误时返回 None
pub(crate) fn load_section<T: serde::de::DeserializeOwned>(config_dir: &Path, key: &str) -> Option<T> {
    let content = fs::read_to_string(config_dir.join("config.json")).ok()?;
    let config = serde_json::from_str::<serde_json::Value>(&content).ok()?;
    serde_json::from_value(config.get(key)?.clone()).ok()
}
