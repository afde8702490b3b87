//! 错误类型

use std::io;
use std::path::PathBuf;

/// 文件访问错误（按 I/O 失败原因分类）
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("权限不足: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("路径不存在: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O 错误 {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("操作已取消")]
    Cancelled,
}

impl StorageError {
    /// 根据 `io::ErrorKind` 归类
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// 启动前的配置错误，直接导致进程退出
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("源目录不存在: {path}")]
    SourceMissing { path: PathBuf },

    #[error("源路径不是目录: {path}")]
    SourceNotDirectory { path: PathBuf },

    #[error("副本路径已存在且不是目录: {path}")]
    ReplicaIsFile { path: PathBuf },

    #[error("源目录与副本目录互相包含: {source_path} <-> {replica_path}")]
    OverlappingTrees {
        source_path: PathBuf,
        replica_path: PathBuf,
    },

    #[error("无法解析路径 {path}: {source}")]
    InvalidPath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// 单次同步无法开始时的错误
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("源目录不可用: {path}")]
    SourceUnavailable { path: PathBuf },
}
