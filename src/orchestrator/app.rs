//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **组装**：显式创建缓存、AI 协作方、降级编排器、队列和调度器
//! 2. **提交**：校验步骤后入队，返回运行 ID 和近似排队位置
//! 3. **查询**：状态快照与运行报告
//! 4. **生命周期**：启动/停止调度器，加载/保存定位器缓存快照

use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::browser::{ChromiumSessionFactory, SessionFactory};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{
    QueuedRun, RunDefinition, RunId, RunOutcome, RunReport, RunState, StatusSnapshot, Step, Submission,
};
use crate::orchestrator::dispatcher::QueueDispatcher;
use crate::orchestrator::queue::ExecutionQueue;
use crate::orchestrator::run_processor::{BrowserRunExecutor, RunExecutor};
use crate::services::{AiAgent, LlmAgent, LocatorCache, TierAnalytics, TierSummary};
use crate::workflow::FallbackOrchestrator;

/// 应用主结构
pub struct App {
    config: Config,
    queue: Arc<ExecutionQueue>,
    dispatcher: QueueDispatcher,
    reports: Arc<DashMap<RunId, RunReport>>,
    cache: Arc<LocatorCache>,
    analytics: Arc<TierAnalytics>,
}

impl App {
    /// 使用真实浏览器和大模型组装应用
    pub fn new(config: Config) -> Self {
        let sessions: Arc<dyn SessionFactory> = Arc::new(ChromiumSessionFactory::new(&config));
        let agent: Arc<dyn AiAgent> = Arc::new(LlmAgent::new(&config));
        Self::with_collaborators(config, sessions, agent)
    }

    /// 使用给定的会话工厂和 AI 协作方组装应用
    pub fn with_collaborators(config: Config, sessions: Arc<dyn SessionFactory>, agent: Arc<dyn AiAgent>) -> Self {
        let cache = Arc::new(LocatorCache::new(config.cache_ttl(), config.cache_failure_threshold));
        let analytics = Arc::new(TierAnalytics::new());
        let orchestrator = Arc::new(FallbackOrchestrator::new(&config, cache.clone(), agent));

        let mut executor = BrowserRunExecutor::new(sessions, orchestrator, config.stop_on_step_failure)
            .with_shared_sink(analytics.clone());
        if !config.analytics_file.trim().is_empty() {
            executor = executor.with_analytics_file(&config.analytics_file);
        }

        Self::assemble(config, Arc::new(executor), cache, analytics)
    }

    /// 使用自定义运行执行器组装应用
    pub fn with_run_executor(config: Config, executor: Arc<dyn RunExecutor>) -> Self {
        let cache = Arc::new(LocatorCache::new(config.cache_ttl(), config.cache_failure_threshold));
        Self::assemble(config, executor, cache, Arc::new(TierAnalytics::new()))
    }

    fn assemble(
        config: Config,
        executor: Arc<dyn RunExecutor>,
        cache: Arc<LocatorCache>,
        analytics: Arc<TierAnalytics>,
    ) -> Self {
        let queue = Arc::new(ExecutionQueue::new(config.max_concurrent_runs));
        let reports = Arc::new(DashMap::new());
        let dispatcher = QueueDispatcher::new(
            queue.clone(),
            executor,
            reports.clone(),
            config.poll_interval(),
            config.join_timeout(),
        );

        Self {
            config,
            queue,
            dispatcher,
            reports,
            cache,
            analytics,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<LocatorCache> {
        &self.cache
    }

    /// 提交一次运行
    pub fn submit_run(
        &self,
        steps: Vec<Step>,
        priority: i64,
        owner_id: &str,
        subject_id: &str,
    ) -> AppResult<Submission> {
        self.submit(QueuedRun::new(steps, priority, owner_id, subject_id))
    }

    /// 提交从文件加载的运行定义
    pub fn submit_definition(&self, definition: RunDefinition) -> AppResult<Submission> {
        let run = QueuedRun::new(
            definition.steps,
            definition.priority,
            definition.owner,
            definition.subject,
        )
        .with_strategy(definition.strategy);
        self.submit(run)
    }

    fn submit(&self, run: QueuedRun) -> AppResult<Submission> {
        if run.steps.is_empty() {
            return Err(AppError::Validation("运行至少需要一个步骤".to_string()));
        }
        for (index, step) in run.steps.iter().enumerate() {
            step.validate()
                .map_err(|e| AppError::Validation(format!("步骤 {}: {}", index + 1, e)))?;
        }

        let run_id = run.id;
        let position = self.queue.enqueue(run)?;
        info!("[运行 {}] 📥 已入队，排队位置 ≈ {}", run_id.short(), position);
        Ok(Submission { run_id, position })
    }

    /// 取消运行
    ///
    /// 排队中的运行立即结束；执行中的运行在下一个步骤边界停止。
    pub fn cancel_run(&self, run_id: RunId) -> bool {
        match self.queue.cancel(run_id) {
            Some(RunState::Queued) => {
                self.reports
                    .insert(run_id, RunReport::new(run_id, RunOutcome::Cancelled, Vec::new(), 0));
                info!("[运行 {}] ⏹️ 已从队列中取消", run_id.short());
                true
            }
            Some(RunState::Active) => {
                info!("[运行 {}] ⏹️ 已发出取消信号", run_id.short());
                true
            }
            None => false,
        }
    }

    pub fn query_status(&self) -> StatusSnapshot {
        self.queue.peek_status()
    }

    pub fn run_report(&self, run_id: RunId) -> Option<RunReport> {
        self.reports.get(&run_id).map(|r| r.clone())
    }

    /// 已结束运行的 (通过数, 未通过数)
    pub fn outcome_counts(&self) -> (usize, usize) {
        let passed = self.reports.iter().filter(|r| r.outcome.is_passed()).count();
        (passed, self.reports.len() - passed)
    }

    pub fn tier_summary(&self) -> TierSummary {
        self.analytics.summary()
    }

    pub fn start(&self) -> bool {
        self.dispatcher.start()
    }

    pub async fn stop(&self) {
        self.dispatcher.stop().await;
    }

    /// 等待队列清空且没有活跃运行；超时返回 false
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let completed = self.dispatcher.completion_notifier();
        let waiting = async {
            while !self.dispatcher.is_idle() {
                tokio::select! {
                    _ = completed.notified() => {}
                    _ = sleep(Duration::from_millis(100)) => {}
                }
            }
        };
        tokio::time::timeout(timeout, waiting).await.is_ok()
    }

    /// 启动时加载缓存快照；失败只记录警告
    pub fn load_cache_snapshot(&self) {
        let path = Path::new(&self.config.cache_snapshot_file);
        if !path.exists() {
            return;
        }
        if let Err(e) = self.cache.load_snapshot(path) {
            warn!("加载定位器缓存失败（已忽略）: {}", e);
        }
    }

    /// 关闭时清理并保存缓存快照；失败只记录警告
    pub fn save_cache_snapshot(&self) {
        let invalid = self.cache.purge_invalid();
        let stale = self.cache.purge_stale(self.cache.ttl());
        if invalid + stale > 0 {
            info!("🧹 清理缓存: 失效 {} 条, 过期 {} 条", invalid, stale);
        }

        if self.config.cache_snapshot_file.trim().is_empty() {
            return;
        }
        if let Err(e) = self.cache.save_snapshot(Path::new(&self.config.cache_snapshot_file)) {
            warn!("保存定位器缓存失败（已忽略）: {}", e);
        }
    }
}
