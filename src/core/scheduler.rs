//! 同步调度：单次运行或按固定间隔周期运行
//!
//! 周期模式下只有一个循环消费定时器和取消信号；每次 tick 通过原子标志抢占运行权，
//! 上一次同步还没结束时 tick 直接跳过，不排队。

use crate::core::engine::{SyncReport, SyncRunner};
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 调度器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// 周期模式下两次 tick 之间
    Waiting,
    Stopped,
}

/// 调度统计
#[derive(Debug, Clone, Default)]
pub struct ScheduleSummary {
    pub runs_started: u32,
    pub runs_failed: u32,
    pub ticks_skipped: u32,
    pub last_report: Option<SyncReport>,
}

/// 同步调度器
pub struct SyncScheduler {
    runner: Arc<dyn SyncRunner>,
    interval: Duration,
    /// 是否有同步正在执行
    in_flight: Arc<AtomicBool>,
    state: watch::Sender<SchedulerState>,
}

impl SyncScheduler {
    /// `interval` 为零表示只运行一次
    pub fn new(runner: Arc<dyn SyncRunner>, interval: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            runner,
            interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            state,
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 启动调度，单次模式在同步结束后返回，周期模式在取消后返回
    pub async fn start(&self, cancel: CancellationToken) -> Result<ScheduleSummary> {
        let result = if self.interval.is_zero() {
            self.run_single(&cancel).await
        } else {
            self.run_periodic(&cancel).await
        };
        self.state.send_replace(SchedulerState::Stopped);
        result
    }

    async fn run_single(&self, cancel: &CancellationToken) -> Result<ScheduleSummary> {
        info!("单次同步模式");
        self.state.send_replace(SchedulerState::Running);
        self.in_flight.store(true, Ordering::SeqCst);
        let result = self.runner.run_once(cancel).await;
        self.in_flight.store(false, Ordering::SeqCst);

        let report = result.inspect_err(|e| error!("同步出错: {:#}", e))?;
        Ok(ScheduleSummary {
            runs_started: 1,
            last_report: Some(report),
            ..Default::default()
        })
    }

    async fn run_periodic(&self, cancel: &CancellationToken) -> Result<ScheduleSummary> {
        info!("周期同步模式: 每 {} 秒一次", self.interval.as_secs_f64());

        let mut summary = ScheduleSummary::default();
        let mut ticker = tokio::time::interval(self.interval);
        // 错过的 tick 不补发
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut worker: Option<JoinHandle<Result<SyncReport>>> = None;
        self.state.send_replace(SchedulerState::Waiting);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("同步已取消，停止定时器");
                    break;
                }
                _ = ticker.tick() => {
                    if self
                        .in_flight
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_err()
                    {
                        debug!("上一次同步尚未结束，跳过本次 tick");
                        summary.ticks_skipped += 1;
                        continue;
                    }

                    // 标志已释放，上一个任务已经结束或正在返回
                    if let Some(previous) = worker.take() {
                        Self::collect(previous.await, &mut summary);
                    }

                    summary.runs_started += 1;
                    worker = Some(self.spawn_run(cancel.clone()));
                }
            }
        }

        // 等待进行中的同步自然结束
        if let Some(handle) = worker.take() {
            debug!("等待进行中的同步结束");
            Self::collect(handle.await, &mut summary);
        }

        Ok(summary)
    }

    fn spawn_run(&self, cancel: CancellationToken) -> JoinHandle<Result<SyncReport>> {
        let runner = self.runner.clone();
        let in_flight = self.in_flight.clone();
        let state = self.state.clone();
        state.send_replace(SchedulerState::Running);

        tokio::spawn(async move {
            scopeguard::defer! {
                in_flight.store(false, Ordering::SeqCst);
                state.send_if_modified(|s| {
                    if *s == SchedulerState::Running {
                        *s = SchedulerState::Waiting;
                        true
                    } else {
                        false
                    }
                });
            }
            runner.run_once(&cancel).await
        })
    }

    fn collect(
        joined: Result<Result<SyncReport>, tokio::task::JoinError>,
        summary: &mut ScheduleSummary,
    ) {
        match joined {
            Ok(Ok(report)) => summary.last_report = Some(report),
            Ok(Err(e)) => {
                error!("同步出错: {:#}", e);
                summary.runs_failed += 1;
            }
            Err(e) => {
                warn!("同步任务异常退出: {}", e);
                summary.runs_failed += 1;
            }
        }
    }
}
