pub mod local;

use crate::error::StorageError;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;

pub use local::LocalStorage;

// ============ 公共常量 ============

/// 流式复制/哈希的缓冲区大小
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// 符号链接、设备文件等，不参与同步
    Other,
}

/// 文件元数据（用于快速检查）
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub size: u64,
    pub modified_time: SystemTime,
    pub kind: EntryKind,
}

impl FileMeta {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// 文件访问抽象接口
///
/// 所有路径都是绝对路径；列举类操作只返回目录下一层的条目名，且不跟随符号链接。
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// 复制文件并同步修改时间，返回写入的字节数
    async fn copy_file(
        &self,
        src: &Path,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, StorageError>;

    /// 删除单个文件；对符号链接只删除链接本身
    async fn delete_file(&self, path: &Path) -> Result<(), StorageError>;

    /// 递归删除目录及其内容
    async fn delete_dir_all(&self, path: &Path) -> Result<(), StorageError>;

    /// 创建目录（含中间层级），目录已存在时直接成功
    async fn create_dir_all(&self, path: &Path) -> Result<(), StorageError>;

    /// 列出目录下的普通文件名
    async fn list_files(&self, dir: &Path) -> Result<Vec<OsString>, StorageError>;

    /// 列出目录下的子目录名
    async fn list_subdir_names(&self, dir: &Path) -> Result<Vec<OsString>, StorageError>;

    /// 列出目录下既不是普通文件也不是目录的条目名（符号链接、设备文件等）
    async fn list_other_names(&self, dir: &Path) -> Result<Vec<OsString>, StorageError>;

    /// 获取元数据，不存在时返回 None
    async fn stat(&self, path: &Path) -> Result<Option<FileMeta>, StorageError>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}
