use clap::Parser;
use dirmirror_lib::config::{SyncConfig, SyncSettings};
use dirmirror_lib::core::{CompareConfig, SyncEngine, SyncScheduler};
use dirmirror_lib::logging::{LogConfig, SizeRotatingWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;

/// 单向目录镜像：让副本目录与源目录保持一致
#[derive(Debug, Parser)]
#[command(name = "dirmirror", version, about)]
struct Args {
    /// 源目录（必须存在）
    source: PathBuf,
    /// 副本目录（不存在时自动创建）
    replica: PathBuf,
    /// 同步间隔（秒），0 表示只同步一次
    interval: u64,
    /// 日志文件路径
    log_file: PathBuf,
    /// 配置目录（读取其中的 config.json）
    #[arg(long)]
    config_dir: Option<PathBuf>,
}

fn console_layer<S>() -> tracing_subscriber::fmt::Layer<S> {
    tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
}

/// 初始化日志系统
fn init_logging(config_dir: &Path, log_file: &Path) {
    let config = LogConfig::load(config_dir);

    let level = config.tracing_level();
    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if !config.enabled {
        // 文件日志已禁用，只输出到控制台
        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer());
        let _ = tracing::subscriber::set_global_default(subscriber);
        return;
    }

    match SizeRotatingWriter::new(log_file, config.max_size_mb) {
        Ok(file_writer) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer());
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer());
            let _ = tracing::subscriber::set_global_default(subscriber);
            tracing::warn!("无法打开日志文件 {}: {}", log_file.display(), e);
        }
    }
}

/// Ctrl-C 时触发取消
fn watch_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("收到中断信号，正在停止...");
            cancel.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let config_dir = args
        .config_dir
        .clone()
        .unwrap_or_else(dirmirror_lib::dirs::default_app_dir);

    init_logging(&config_dir, &args.log_file);

    let mut config = match SyncConfig::new(&args.source, &args.replica, args.interval).validate() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("配置无效: {}", e);
            return ExitCode::from(2);
        }
    };
    SyncSettings::load(&config_dir).apply(&mut config);

    let compare = CompareConfig::load(&config_dir);
    let interval = Duration::from_secs(config.interval_secs);
    let engine = SyncEngine::with_compare_config(config, &compare);
    let scheduler = SyncScheduler::new(Arc::new(engine), interval);

    let cancel = CancellationToken::new();
    watch_ctrl_c(cancel.clone());

    match scheduler.start(cancel).await {
        Ok(summary) => {
            tracing::info!(
                "已停止: 共运行 {} 次, 失败 {} 次, 跳过 {} 次 tick",
                summary.runs_started,
                summary.runs_failed,
                summary.ticks_skipped
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("同步失败: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["dirmirror", "src", "dst", "30", "mirror.log"]).unwrap();
        assert_eq!(args.source, PathBuf::from("src"));
        assert_eq!(args.interval, 30);
        assert!(args.config_dir.is_none());

        let args = Args::try_parse_from([
            "dirmirror",
            "src",
            "dst",
            "0",
            "mirror.log",
            "--config-dir",
            "/tmp/cfg",
        ])
        .unwrap();
        assert_eq!(args.config_dir, Some(PathBuf::from("/tmp/cfg")));
    }

    #[test]
    fn test_args_reject_bad_interval() {
        assert!(Args::try_parse_from(["dirmirror", "src", "dst", "-5", "mirror.log"]).is_err());
        assert!(Args::try_parse_from(["dirmirror", "src", "dst", "soon", "mirror.log"]).is_err());
        assert!(Args::try_parse_from(["dirmirror", "src", "dst"]).is_err());
    }
}
