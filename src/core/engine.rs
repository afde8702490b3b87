use crate::config::SyncConfig;
use crate::core::comparator::{CompareConfig, CompareStrategy, FileComparator};
use crate::core::reconciler::{ReconcileOptions, ReconcileStats, Reconciler};
use crate::error::SyncError;
use crate::storage::{FileAccess, LocalStorage};
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

/// 同步状态
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Completed,
    /// 完成，但部分条目失败
    CompletedWithErrors,
    Cancelled,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status: SyncStatus,
    pub files_copied: u32,
    pub files_skipped: u32,
    pub files_deleted: u32,
    pub dirs_deleted: u32,
    pub dirs_created: u32,
    pub files_failed: u32,
    pub dirs_failed: u32,
    pub bytes_transferred: u64,
    /// 耗时（毫秒）
    pub duration: u64,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn from_stats(run_id: String, start_time: i64, stats: ReconcileStats) -> Self {
        let end_time = chrono::Utc::now().timestamp_millis();
        let status = if stats.cancelled {
            SyncStatus::Cancelled
        } else if stats.has_errors() {
            SyncStatus::CompletedWithErrors
        } else {
            SyncStatus::Completed
        };

        Self {
            run_id,
            start_time,
            end_time,
            status,
            files_copied: stats.files_copied,
            files_skipped: stats.files_skipped,
            files_deleted: stats.files_deleted,
            dirs_deleted: stats.dirs_deleted,
            dirs_created: stats.dirs_created,
            files_failed: stats.files_failed,
            dirs_failed: stats.dirs_failed,
            bytes_transferred: stats.bytes_transferred,
            duration: (end_time - start_time).max(0) as u64,
            errors: stats.errors,
        }
    }

    /// 是否有任何修改
    pub fn changed_anything(&self) -> bool {
        self.files_copied + self.files_deleted + self.dirs_deleted + self.dirs_created > 0
    }
}

/// 可被调度器反复执行的一次同步
#[async_trait]
pub trait SyncRunner: Send + Sync {
    async fn run_once(&self, cancel: &CancellationToken) -> Result<SyncReport>;
}

/// 同步引擎
pub struct SyncEngine {
    config: SyncConfig,
    reconciler: Reconciler,
    storage: Arc<dyn FileAccess>,
}

impl SyncEngine {
    /// 使用本地文件系统和默认比较策略
    pub fn new(config: SyncConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(LocalStorage::new()),
            Arc::new(FileComparator::default()),
        )
    }

    pub fn with_compare_config(config: SyncConfig, compare: &CompareConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(LocalStorage::new()),
            Arc::new(FileComparator::with_config(compare)),
        )
    }

    pub fn with_parts(
        config: SyncConfig,
        storage: Arc<dyn FileAccess>,
        comparator: Arc<dyn CompareStrategy>,
    ) -> Self {
        let options = ReconcileOptions {
            max_concurrent_deletes: config.max_concurrent_deletes,
        };
        let reconciler = Reconciler::with_options(storage.clone(), comparator, options);
        Self {
            config,
            reconciler,
            storage,
        }
    }

    async fn run_inner(&self, run_id: String, cancel: &CancellationToken) -> Result<SyncReport> {
        let start_time = chrono::Utc::now().timestamp_millis();
        let source = &self.config.source_path;
        let replica = &self.config.replica_path;

        // 源目录在两次运行之间可能被移除
        match self.storage.stat(source).await {
            Ok(Some(meta)) if meta.is_dir() => {}
            _ => {
                return Err(SyncError::SourceUnavailable {
                    path: source.clone(),
                }
                .into())
            }
        }

        info!(
            "开始同步: {} -> {} ({})",
            source.display(),
            replica.display(),
            self.storage.name()
        );

        let stats = self.reconciler.synchronize(source, replica, cancel).await;
        let report = SyncReport::from_stats(run_id, start_time, stats);

        match report.status {
            SyncStatus::Cancelled => info!("同步已取消"),
            SyncStatus::CompletedWithErrors => warn!(
                "同步完成但有错误: 复制 {}, 删除 {}, 失败 {}",
                report.files_copied,
                report.files_deleted + report.dirs_deleted,
                report.files_failed + report.dirs_failed
            ),
            SyncStatus::Completed => info!(
                "同步完成: 复制 {}, 跳过 {}, 删除 {}, {} 字节, 耗时 {}ms",
                report.files_copied,
                report.files_skipped,
                report.files_deleted + report.dirs_deleted,
                report.bytes_transferred,
                report.duration
            ),
        }

        Ok(report)
    }
}

#[async_trait]
impl SyncRunner for SyncEngine {
    async fn run_once(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("sync_run", run_id = %run_id);
        self.run_inner(run_id, cancel).instrument(span).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> SyncConfig {
        SyncConfig {
            source_path: dir.path().join("source"),
            replica_path: dir.path().join("replica"),
            interval_secs: 0,
            max_concurrent_deletes: 4,
        }
    }

    #[tokio::test]
    async fn test_report_counts_and_status() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("source/sub")).unwrap();
        std::fs::write(dir.path().join("source/a.txt"), b"12345").unwrap();
        std::fs::write(dir.path().join("source/sub/b.txt"), b"0123456789").unwrap();

        let engine = SyncEngine::new(config(&dir));
        let report = engine.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.status, SyncStatus::Completed);
        assert_eq!(report.files_copied, 2);
        assert_eq!(report.dirs_created, 2);
        assert_eq!(report.bytes_transferred, 15);
        assert!(report.changed_anything());
        assert!(uuid::Uuid::parse_str(&report.run_id).is_ok());

        let again = engine.run_once(&CancellationToken::new()).await.unwrap();
        assert!(!again.changed_anything());
        assert_eq!(again.files_skipped, 2);
    }

    #[tokio::test]
    async fn test_missing_source_fails_run() {
        let dir = TempDir::new().unwrap();
        let engine = SyncEngine::new(config(&dir));

        let err = engine.run_once(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::SourceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_cancelled() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("source")).unwrap();
        std::fs::write(dir.path().join("source/a.txt"), b"a").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = SyncEngine::new(config(&dir)).run_once(&cancel).await.unwrap();
        assert_eq!(report.status, SyncStatus::Cancelled);
        assert_eq!(report.files_copied, 0);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = SyncReport::from_stats("id".to_string(), 0, ReconcileStats::default());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");
        assert!(json.get("filesCopied").is_some());
        assert!(json.get("bytesTransferred").is_some());
    }
}
