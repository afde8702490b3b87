//! 目录树对账：让副本目录与源目录保持一致
//!
//! 每一层按固定顺序处理：确保副本目录存在 -> 删除副本多余条目 -> 同步文件 -> 递归子目录。
//! 子目录列表在清理之后从源目录重新获取，已删除的副本目录不会再被访问。

use crate::core::comparator::CompareStrategy;
use crate::error::StorageError;
use crate::storage::{EntryKind, FileAccess};
use futures::future::BoxFuture;
use futures::StreamExt;
use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 对账配置
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// 同一层级删除操作的最大并发数
    pub max_concurrent_deletes: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            max_concurrent_deletes: 8,
        }
    }
}

/// 单次对账的统计
#[derive(Debug, Clone, Default)]
pub struct ReconcileStats {
    pub files_copied: u32,
    pub files_skipped: u32,
    pub files_deleted: u32,
    pub dirs_deleted: u32,
    pub dirs_created: u32,
    pub files_failed: u32,
    /// 因无法列举而放弃的子树数量
    pub dirs_failed: u32,
    pub bytes_transferred: u64,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl ReconcileStats {
    fn record_entry_failure(&mut self, path: &Path, err: &StorageError) {
        self.files_failed += 1;
        self.errors.push(format!("{}: {}", path.display(), err));
    }

    fn record_subtree_failure(&mut self, path: &Path, err: &StorageError) {
        self.dirs_failed += 1;
        self.errors.push(format!("{}: {}", path.display(), err));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// 目录对账器
pub struct Reconciler {
    storage: Arc<dyn FileAccess>,
    comparator: Arc<dyn CompareStrategy>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(storage: Arc<dyn FileAccess>, comparator: Arc<dyn CompareStrategy>) -> Self {
        Self {
            storage,
            comparator,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(
        storage: Arc<dyn FileAccess>,
        comparator: Arc<dyn CompareStrategy>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            storage,
            comparator,
            options,
        }
    }

    /// 递归同步 `source_root` 到 `replica_root`
    pub async fn synchronize(
        &self,
        source_root: &Path,
        replica_root: &Path,
        cancel: &CancellationToken,
    ) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        self.sync_dir(
            source_root.to_path_buf(),
            replica_root.to_path_buf(),
            cancel,
            &mut stats,
        )
        .await;
        stats
    }

    fn sync_dir<'a>(
        &'a self,
        source: PathBuf,
        replica: PathBuf,
        cancel: &'a CancellationToken,
        stats: &'a mut ReconcileStats,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                return;
            }

            // 1. 确保副本目录存在
            if let Err(e) = self.ensure_dir(&replica, stats).await {
                error!("创建副本目录失败，跳过该子树: {} - {}", replica.display(), e);
                stats.record_subtree_failure(&replica, &e);
                return;
            }

            // 2. 删除副本中多余的文件和目录
            if let Err(e) = self.prune(&source, &replica, stats).await {
                error!("列举目录失败，跳过该子树: {} - {}", source.display(), e);
                stats.record_subtree_failure(&source, &e);
                return;
            }

            // 3. 同步当前层的文件
            if let Err(e) = self.sync_files(&source, &replica, cancel, stats).await {
                error!("列举源文件失败，跳过该子树: {} - {}", source.display(), e);
                stats.record_subtree_failure(&source, &e);
                return;
            }
            if stats.cancelled {
                return;
            }

            // 4. 递归子目录（从源目录重新列举）
            let subdirs = match self.storage.list_subdir_names(&source).await {
                Ok(names) => names,
                Err(e) => {
                    error!("列举源子目录失败，跳过该子树: {} - {}", source.display(), e);
                    stats.record_subtree_failure(&source, &e);
                    return;
                }
            };

            for name in subdirs {
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    return;
                }
                self.sync_dir(source.join(&name), replica.join(&name), cancel, stats)
                    .await;
            }
        })
    }

    async fn ensure_dir(&self, replica: &Path, stats: &mut ReconcileStats) -> Result<(), StorageError> {
        let existed = match self.storage.stat(replica).await? {
            Some(meta) if meta.is_dir() => true,
            Some(_) => {
                // 文件或符号链接占了目录的位置，只删除条目本身，不跟随链接
                self.storage.delete_file(replica).await?;
                info!("已删除占位条目: {}", replica.display());
                stats.files_deleted += 1;
                false
            }
            None => false,
        };
        self.storage.create_dir_all(replica).await?;
        if !existed {
            info!("已创建目录: {}", replica.display());
            stats.dirs_created += 1;
        }
        Ok(())
    }

    /// 删除副本中源目录没有的同名同类型条目，以及副本中所有符号链接和特殊文件；
    /// 删除并发进行，全部完成后返回
    async fn prune(
        &self,
        source: &Path,
        replica: &Path,
        stats: &mut ReconcileStats,
    ) -> Result<(), StorageError> {
        let storage = self.storage.as_ref();
        let (source_files, replica_files, source_dirs, replica_dirs, replica_others) = tokio::try_join!(
            storage.list_files(source),
            storage.list_files(replica),
            storage.list_subdir_names(source),
            storage.list_subdir_names(replica),
            storage.list_other_names(replica),
        )?;

        let source_files: HashSet<OsString> = source_files.into_iter().collect();
        let source_dirs: HashSet<OsString> = source_dirs.into_iter().collect();

        let stale_files = replica_files
            .into_iter()
            .filter(|name| !source_files.contains(name))
            .map(|name| (replica.join(name), EntryKind::File));
        let stale_dirs = replica_dirs
            .into_iter()
            .filter(|name| !source_dirs.contains(name))
            .map(|name| (replica.join(name), EntryKind::Dir));
        // 源端的符号链接不会被复制，副本中的链接一律视为多余
        let stale_others = replica_others
            .into_iter()
            .map(|name| (replica.join(name), EntryKind::Other));

        let results: Vec<(PathBuf, EntryKind, Result<(), StorageError>)> =
            futures::stream::iter(stale_files.chain(stale_dirs).chain(stale_others))
                .map(|(path, kind)| async move {
                    let result = match kind {
                        EntryKind::Dir => storage.delete_dir_all(&path).await,
                        _ => storage.delete_file(&path).await,
                    };
                    (path, kind, result)
                })
                .buffer_unordered(self.options.max_concurrent_deletes.max(1))
                .collect()
                .await;

        for (path, kind, result) in results {
            match (result, kind) {
                (Ok(()), EntryKind::Dir) => stats.dirs_deleted += 1,
                (Ok(()), _) => stats.files_deleted += 1,
                (Err(e), _) => {
                    error!("删除失败: {} - {}", path.display(), e);
                    stats.record_entry_failure(&path, &e);
                }
            }
        }

        Ok(())
    }

    async fn sync_files(
        &self,
        source: &Path,
        replica: &Path,
        cancel: &CancellationToken,
        stats: &mut ReconcileStats,
    ) -> Result<(), StorageError> {
        let files = self.storage.list_files(source).await?;

        for name in files {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                return Ok(());
            }

            let src = source.join(&name);
            let dst = replica.join(&name);

            match self.needs_copy(&src, &dst, cancel).await {
                Ok(false) => {
                    debug!("文件未变化，跳过: {}", src.display());
                    stats.files_skipped += 1;
                    continue;
                }
                Ok(true) => {}
                Err(_) => {
                    stats.cancelled = true;
                    return Ok(());
                }
            }

            match self.storage.copy_file(&src, &dst, cancel).await {
                Ok(bytes) => {
                    stats.files_copied += 1;
                    stats.bytes_transferred += bytes;
                }
                Err(e) if e.is_cancelled() => {
                    info!("复制已取消: {}", src.display());
                    stats.cancelled = true;
                    return Ok(());
                }
                Err(e) => {
                    error!("复制失败: {} -> {} - {}", src.display(), dst.display(), e);
                    stats.record_entry_failure(&src, &e);
                }
            }
        }

        Ok(())
    }

    /// 判断是否需要复制；只有取消会返回错误，其余比较失败都按需要更新处理
    async fn needs_copy(
        &self,
        src: &Path,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, StorageError> {
        match self.storage.stat(dst).await {
            Ok(Some(meta)) if meta.is_file() => {}
            Ok(_) => return Ok(true),
            Err(e) => {
                warn!("读取副本元数据失败，按需要更新处理: {} - {}", dst.display(), e);
                return Ok(true);
            }
        }

        match self.comparator.are_equivalent(src, dst, cancel).await {
            Ok(equivalent) => Ok(!equivalent),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!("比较文件失败，按需要更新处理: {} - {}", src.display(), e);
                Ok(true)
            }
        }
    }
}
