//! 队列调度器 - 编排层
//!
//! 长期运行的调度循环：
//! 1. 有空闲槽位时取出最靠前的运行并准入（同一临界区内完成）
//! 2. 准入成功后在独立任务中执行，完成守卫保证槽位只释放一次
//!
//! 唤醒来源：固定间隔轮询，以及入队/释放时的通知。

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{QueuedRun, RunId, RunOutcome, RunReport};
use crate::orchestrator::queue::ExecutionQueue;
use crate::orchestrator::run_processor::RunExecutor;

/// 运行结束时释放槽位
///
/// 无论执行成功、失败还是 panic，drop 时都会释放一次。
struct SlotGuard {
    queue: Arc<ExecutionQueue>,
    run_id: RunId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.queue.release(self.run_id) {
            debug!("[运行 {}] 槽位已释放", self.run_id.short());
        }
    }
}

struct DispatcherInner {
    queue: Arc<ExecutionQueue>,
    executor: Arc<dyn RunExecutor>,
    reports: Arc<DashMap<RunId, RunReport>>,
    poll_interval: Duration,
    completed: Arc<Notify>,
}

impl DispatcherInner {
    async fn run_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let wake = self.queue.notifier();
        info!("🧭 调度器已启动 (轮询间隔 {}ms)", self.poll_interval.as_millis());

        loop {
            self.dispatch_ready();

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = wake.notified() => {}
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!("🧭 调度器已停止");
    }

    /// 在容量允许的范围内准入并启动运行
    fn dispatch_ready(&self) {
        while let Some(run) = self.queue.admit_next() {
            if run.cancel.is_cancelled() {
                self.queue.release(run.id);
                self.reports
                    .insert(run.id, RunReport::new(run.id, RunOutcome::Cancelled, Vec::new(), 0));
                self.completed.notify_waiters();
                continue;
            }
            self.launch(run);
        }
    }

    fn launch(&self, run: QueuedRun) {
        let run_id = run.id;
        let guard = SlotGuard {
            queue: self.queue.clone(),
            run_id,
        };
        let executor = self.executor.clone();
        let reports = self.reports.clone();
        let completed = self.completed.clone();

        info!("[运行 {}] 🎫 已准入，活跃 {}/{}", run_id.short(), self.queue.active_count(), self.queue.max_active());

        tokio::spawn(async move {
            // 内层任务隔离 panic，外层负责记录报告和释放槽位
            let worker = tokio::spawn(async move { executor.execute(run).await });
            let report = match worker.await {
                Ok(report) => report,
                Err(e) => {
                    error!("[运行 {}] 💥 执行任务异常退出: {}", run_id.short(), e);
                    RunReport::crashed(run_id, e.to_string())
                }
            };
            reports.insert(run_id, report);
            drop(guard);
            completed.notify_waiters();
        });
    }
}

/// 队列调度器
///
/// 生命周期：`new` → `start`（可重复调用）→ `stop`（等待循环退出，不取消已准入的运行）
pub struct QueueDispatcher {
    inner: Arc<DispatcherInner>,
    join_timeout: Duration,
    handle: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl QueueDispatcher {
    pub fn new(
        queue: Arc<ExecutionQueue>,
        executor: Arc<dyn RunExecutor>,
        reports: Arc<DashMap<RunId, RunReport>>,
        poll_interval: Duration,
        join_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                queue,
                executor,
                reports,
                poll_interval,
                completed: Arc::new(Notify::new()),
            }),
            join_timeout,
            handle: Mutex::new(None),
        }
    }

    /// 启动调度循环；已在运行时返回 false
    pub fn start(&self) -> bool {
        let mut handle = self.handle.lock();
        if let Some((_, join)) = handle.as_ref() {
            if !join.is_finished() {
                return false;
            }
        }

        let shutdown = CancellationToken::new();
        let join = tokio::spawn(self.inner.clone().run_loop(shutdown.clone()));
        *handle = Some((shutdown, join));
        true
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|(_, join)| !join.is_finished())
    }

    /// 通知循环退出并在限定时间内等待
    pub async fn stop(&self) {
        let taken = self.handle.lock().take();
        let Some((shutdown, join)) = taken else {
            return;
        };
        shutdown.cancel();

        match tokio::time::timeout(self.join_timeout, join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("调度循环异常退出: {}", e),
            Err(_) => warn!("调度循环未能在 {}ms 内退出", self.join_timeout.as_millis()),
        }
    }

    /// 队列为空且没有活跃运行
    pub fn is_idle(&self) -> bool {
        self.inner.queue.is_idle()
    }

    /// 运行完成时被唤醒
    pub fn completion_notifier(&self) -> Arc<Notify> {
        self.inner.completed.clone()
    }
}
