//! 单个运行处理器 - 编排层
//!
//! ## 职责
//!
//! 1. **打开会话**：为运行打开独立的浏览器会话
//! 2. **顺序执行**：逐步调用降级编排器
//! 3. **取消检查**：只在步骤边界响应取消
//! 4. **失败策略**：按 `stop_on_step_failure` 决定是否继续
//! 5. **运行报告**：汇总每一步的尝试历史

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::browser::SessionFactory;
use crate::infrastructure::BrowserDriver;
use crate::error::{TierError, TierErrorKind};
use crate::models::{QueuedRun, RunOutcome, RunReport, StepExecutionResult};
use crate::services::{AnalyticsSink, JsonlAnalyticsWriter};
use crate::workflow::{FallbackOrchestrator, StepCtx};

/// 运行执行接口
///
/// 实现方不应该 panic；即便 panic，调度器也会把它记为崩溃并释放槽位。
#[async_trait]
pub trait RunExecutor: Send + Sync {
    async fn execute(&self, run: QueuedRun) -> RunReport;
}

/// 顺序执行运行中的所有步骤
///
/// # 参数
/// - `orchestrator`: 降级编排器
/// - `driver`: 本运行独占的浏览器驱动
/// - `run`: 已准入的运行
/// - `stop_on_step_failure`: 步骤失败后是否停止
/// - `sinks`: 分析记录接收方
pub async fn process_run(
    orchestrator: &FallbackOrchestrator,
    driver: &dyn BrowserDriver,
    run: &QueuedRun,
    stop_on_step_failure: bool,
    sinks: &[Arc<dyn AnalyticsSink>],
) -> RunReport {
    let start = Instant::now();
    let total = run.steps.len();
    let mut results = Vec::with_capacity(total);
    let mut first_failure: Option<usize> = None;
    let mut cancelled = false;

    for (index, step) in run.steps.iter().enumerate() {
        if run.cancel.is_cancelled() {
            info!("[运行 {}] ⏹️ 已取消，停在步骤 {}/{}", run.id.short(), index + 1, total);
            results.push(StepExecutionResult {
                strategy: run.strategy.unwrap_or(orchestrator.default_strategy()),
                final_tier: None,
                success: false,
                total_latency_ms: 0,
                history: Vec::new(),
                error: Some(TierError::new(TierErrorKind::Cancelled, "运行已取消，步骤未执行")),
            });
            cancelled = true;
            break;
        }

        let ctx = StepCtx::new(run.id, index, total);
        let result = orchestrator
            .execute_step(driver, step, run.strategy, &ctx, sinks)
            .await;
        let success = result.success;
        results.push(result);

        if !success {
            first_failure.get_or_insert(index);
            if stop_on_step_failure {
                warn!("{} 步骤失败，停止本次运行", ctx);
                break;
            }
        }
    }

    let outcome = match (cancelled, first_failure) {
        (true, _) => RunOutcome::Cancelled,
        (false, Some(step_index)) => RunOutcome::Failed { step_index },
        (false, None) => RunOutcome::Passed,
    };

    RunReport::new(run.id, outcome, results, start.elapsed().as_millis() as u64)
}

/// 基于浏览器会话的运行执行器
pub struct BrowserRunExecutor {
    sessions: Arc<dyn SessionFactory>,
    orchestrator: Arc<FallbackOrchestrator>,
    shared_sinks: Vec<Arc<dyn AnalyticsSink>>,
    analytics_file: Option<PathBuf>,
    stop_on_step_failure: bool,
}

impl BrowserRunExecutor {
    pub fn new(
        sessions: Arc<dyn SessionFactory>,
        orchestrator: Arc<FallbackOrchestrator>,
        stop_on_step_failure: bool,
    ) -> Self {
        Self {
            sessions,
            orchestrator,
            shared_sinks: Vec::new(),
            analytics_file: None,
            stop_on_step_failure,
        }
    }

    /// 所有运行共享的接收方（例如进程内统计）
    pub fn with_shared_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.shared_sinks.push(sink);
        self
    }

    /// 每个运行各自创建一个 JSONL 写入器
    pub fn with_analytics_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.analytics_file = Some(path.into());
        self
    }

    fn sinks_for_run(&self) -> Vec<Arc<dyn AnalyticsSink>> {
        let mut sinks = self.shared_sinks.clone();
        if let Some(path) = &self.analytics_file {
            sinks.push(Arc::new(JsonlAnalyticsWriter::with_path(path.clone())));
        }
        sinks
    }
}

#[async_trait]
impl RunExecutor for BrowserRunExecutor {
    async fn execute(&self, run: QueuedRun) -> RunReport {
        let short_id = run.id.short();
        info!(
            "[运行 {}] 🚀 开始执行 ({} 个步骤, owner={}, subject={})",
            short_id,
            run.steps.len(),
            run.owner_id,
            run.subject_id
        );

        let driver = match self.sessions.open_session(run.id).await {
            Ok(driver) => driver,
            Err(e) => {
                error!("[运行 {}] ❌ 打开浏览器会话失败: {:#}", short_id, e);
                return RunReport::crashed(run.id, format!("打开浏览器会话失败: {:#}", e));
            }
        };

        let sinks = self.sinks_for_run();
        let report = process_run(
            &self.orchestrator,
            driver.as_ref(),
            &run,
            self.stop_on_step_failure,
            &sinks,
        )
        .await;

        if let Err(e) = driver.close().await {
            warn!("[运行 {}] 关闭浏览器会话失败: {}", short_id, e);
        }

        match &report.outcome {
            RunOutcome::Passed => info!("[运行 {}] ✅ 全部步骤通过 ({}ms)", short_id, report.duration_ms),
            RunOutcome::Failed { step_index } => {
                error!("[运行 {}] ❌ 步骤 {} 失败 ({}ms)", short_id, step_index + 1, report.duration_ms)
            }
            RunOutcome::Cancelled => info!("[运行 {}] ⏹️ 已取消", short_id),
            RunOutcome::Crashed { message } => error!("[运行 {}] 💥 崩溃: {}", short_id, message),
        }

        report
    }
}
