use crate::error::StorageError;
use crate::storage::COPY_BUFFER_SIZE;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 比较策略类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    Size,
    ModifiedTime,
    ContentHash,
}

/// 比较配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareConfig {
    /// 时间容差（秒）
    #[serde(default = "default_time_tolerance")]
    pub time_tolerance_seconds: f64,
    /// 按顺序执行的比较策略，应从低开销到高开销排列
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyKind>,
}

fn default_time_tolerance() -> f64 {
    2.0 // 吸收不同文件系统的时间精度差异
}

fn default_strategies() -> Vec<StrategyKind> {
    vec![
        StrategyKind::Size,
        StrategyKind::ModifiedTime,
        StrategyKind::ContentHash,
    ]
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: default_time_tolerance(),
            strategies: default_strategies(),
        }
    }
}

impl CompareConfig {
    /// 从配置文件加载比较配置
    pub fn load(config_dir: &Path) -> Self {
        crate::config::load_section(config_dir, "compare").unwrap_or_default()
    }

    fn time_tolerance(&self) -> Duration {
        Duration::try_from_secs_f64(self.time_tolerance_seconds.max(0.0)).unwrap_or(Duration::ZERO)
    }
}

/// 文件等价判断策略，只读不写
#[async_trait]
pub trait CompareStrategy: Send + Sync {
    /// 两个文件是否等价（无需复制）
    async fn are_equivalent(
        &self,
        a: &Path,
        b: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, StorageError>;

    fn name(&self) -> &'static str;
}

async fn metadata(path: &Path) -> Result<std::fs::Metadata, StorageError> {
    tokio::fs::metadata(path)
        .await
        .map_err(|e| StorageError::from_io(path, e))
}

/// 大小比较
pub struct SizeStrategy;

#[async_trait]
impl CompareStrategy for SizeStrategy {
    async fn are_equivalent(
        &self,
        a: &Path,
        b: &Path,
        _cancel: &CancellationToken,
    ) -> Result<bool, StorageError> {
        let (meta_a, meta_b) = tokio::try_join!(metadata(a), metadata(b))?;
        if meta_a.len() != meta_b.len() {
            debug!("文件大小不同: {} ({} != {})", a.display(), meta_a.len(), meta_b.len());
            return Ok(false);
        }
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "size"
    }
}

/// 修改时间比较（带容差）
pub struct ModifiedTimeStrategy {
    tolerance: Duration,
}

impl ModifiedTimeStrategy {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }
}

impl Default for ModifiedTimeStrategy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

fn abs_diff(a: SystemTime, b: SystemTime) -> Duration {
    a.duration_since(b)
        .or_else(|_| b.duration_since(a))
        .unwrap_or(Duration::ZERO)
}

#[async_trait]
impl CompareStrategy for ModifiedTimeStrategy {
    async fn are_equivalent(
        &self,
        a: &Path,
        b: &Path,
        _cancel: &CancellationToken,
    ) -> Result<bool, StorageError> {
        let (meta_a, meta_b) = tokio::try_join!(metadata(a), metadata(b))?;
        let time_a = meta_a.modified().map_err(|e| StorageError::from_io(a, e))?;
        let time_b = meta_b.modified().map_err(|e| StorageError::from_io(b, e))?;

        let diff = abs_diff(time_a, time_b);
        if diff > self.tolerance {
            debug!("文件时间不同: {} (diff={:?})", a.display(), diff);
            return Ok(false);
        }
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "modified_time"
    }
}

/// 计算文件内容的 BLAKE3 哈希（流式读取，分块检查取消）
pub async fn hash_file(path: &Path, cancel: &CancellationToken) -> Result<blake3::Hash, StorageError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| StorageError::from_io(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// 内容哈希比较
pub struct ContentHashStrategy;

#[async_trait]
impl CompareStrategy for ContentHashStrategy {
    async fn are_equivalent(
        &self,
        a: &Path,
        b: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, StorageError> {
        let (hash_a, hash_b) = tokio::try_join!(hash_file(a, cancel), hash_file(b, cancel))?;
        if hash_a != hash_b {
            debug!("文件内容不同: {}", a.display());
            return Ok(false);
        }
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "content_hash"
    }
}

/// 文件比较器：按顺序执行所有策略，全部通过才算等价
pub struct FileComparator {
    strategies: Vec<Box<dyn CompareStrategy>>,
}

impl FileComparator {
    pub fn new(strategies: Vec<Box<dyn CompareStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn with_config(config: &CompareConfig) -> Self {
        let strategies = config
            .strategies
            .iter()
            .map(|kind| -> Box<dyn CompareStrategy> {
                match kind {
                    StrategyKind::Size => Box::new(SizeStrategy),
                    StrategyKind::ModifiedTime => {
                        Box::new(ModifiedTimeStrategy::new(config.time_tolerance()))
                    }
                    StrategyKind::ContentHash => Box::new(ContentHashStrategy),
                }
            })
            .collect();
        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Default for FileComparator {
    fn default() -> Self {
        Self::with_config(&CompareConfig::default())
    }
}

#[async_trait]
impl CompareStrategy for FileComparator {
    async fn are_equivalent(
        &self,
        a: &Path,
        b: &Path,
        cancel: &CancellationToken,
    ) -> Result<bool, StorageError> {
        // 没有策略时视为不等价
        if self.strategies.is_empty() {
            return Ok(false);
        }
        for strategy in &self.strategies {
            if !strategy.are_equivalent(a, b, cancel).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}
