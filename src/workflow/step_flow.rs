//! 步骤降级流程 - 流程层
//!
//! 核心职责：定义"一个步骤"的完整执行流程
//!
//! 流程顺序（按策略）：
//! - A: Tier-1 → Tier-2
//! - B: Tier-1 → Tier-3
//! - C: Tier-1 → Tier-2 → Tier-3
//!
//! 任一层成功即结束；最后一层也失败时结果为 `AllTiersExhausted`，附带完整历史。

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{TierError, TierErrorKind};
use crate::infrastructure::BrowserDriver;
use crate::models::{AttemptRecord, FallbackStrategy, Step, StepAnalyticsRecord, StepExecutionResult, Tier};
use crate::services::{AiAgent, AnalyticsSink, LocatorCache};
use crate::tiers::{DelegatedExecutor, DirectExecutor, HybridExecutor, TierExecutor};
use crate::workflow::step_ctx::StepCtx;

/// 兜底超时在层级预算之外额外留出的时间
const BACKSTOP_GRACE: Duration = Duration::from_secs(2);

/// 降级编排器
///
/// - 按策略依次尝试各层，每层最多一次
/// - 每层由执行器自己控制预算，超时记为 `ExecutionTimeout`；
///   编排器只在执行器超出预算加宽限后兜底
/// - 不持有浏览器会话，只借用调用方给的驱动
/// - 分析记录写入失败不影响步骤结果
pub struct FallbackOrchestrator {
    direct: Arc<dyn TierExecutor>,
    hybrid: Arc<dyn TierExecutor>,
    delegated: Arc<dyn TierExecutor>,
    tier_timeout: Duration,
    default_strategy: FallbackStrategy,
}

impl FallbackOrchestrator {
    pub fn new(config: &Config, cache: Arc<LocatorCache>, agent: Arc<dyn AiAgent>) -> Self {
        Self::with_executors(
            Arc::new(DirectExecutor::new(config)),
            Arc::new(HybridExecutor::new(config, cache, agent.clone())),
            Arc::new(DelegatedExecutor::new(agent, config.tier_timeout())),
            config.tier_timeout(),
            config.fallback_strategy,
        )
    }

    pub fn with_executors(
        direct: Arc<dyn TierExecutor>,
        hybrid: Arc<dyn TierExecutor>,
        delegated: Arc<dyn TierExecutor>,
        tier_timeout: Duration,
        default_strategy: FallbackStrategy,
    ) -> Self {
        Self {
            direct,
            hybrid,
            delegated,
            tier_timeout,
            default_strategy,
        }
    }

    pub fn default_strategy(&self) -> FallbackStrategy {
        self.default_strategy
    }

    fn executor(&self, tier: Tier) -> &dyn TierExecutor {
        match tier {
            Tier::Direct => self.direct.as_ref(),
            Tier::Hybrid => self.hybrid.as_ref(),
            Tier::Delegated => self.delegated.as_ref(),
        }
    }

    /// 执行单个步骤
    ///
    /// `strategy` 为 None 时使用默认策略。
    pub async fn execute_step(
        &self,
        driver: &dyn BrowserDriver,
        step: &Step,
        strategy: Option<FallbackStrategy>,
        ctx: &StepCtx,
        sinks: &[Arc<dyn AnalyticsSink>],
    ) -> StepExecutionResult {
        let strategy = strategy.unwrap_or(self.default_strategy);
        let start = Instant::now();
        let mut history: Vec<AttemptRecord> = Vec::with_capacity(strategy.tiers().len());

        info!("{} ▶ {} (策略 {})", ctx, step.label(), strategy);

        for &tier in strategy.tiers() {
            let record = self.attempt_tier(driver, step, tier).await;
            let success = record.success;

            if success {
                info!("{} ✅ {} 成功 ({}ms)", ctx, tier, record.latency_ms);
            } else if let Some(err) = &record.error {
                warn!("{} ⚠️ {} 失败: {}", ctx, tier, err);
            }
            history.push(record);

            if success {
                break;
            }
        }

        let final_tier = history.last().filter(|r| r.success).map(|r| r.tier);
        let mut result = StepExecutionResult {
            strategy,
            final_tier,
            success: final_tier.is_some(),
            total_latency_ms: start.elapsed().as_millis() as u64,
            history,
            error: None,
        };
        if !result.success {
            result.error = Some(TierError::new(
                TierErrorKind::AllTiersExhausted,
                result.failure_summary(),
            ));
            warn!("{} ❌ 所有层级均失败", ctx);
        }

        let record = StepAnalyticsRecord::from_result(ctx.run_id, ctx.step_index, &result);
        for sink in sinks {
            if let Err(e) = sink.record(&record).await {
                warn!("{} 写入分析记录失败（已忽略）: {}", ctx, e);
            }
        }

        result
    }

    async fn attempt_tier(&self, driver: &dyn BrowserDriver, step: &Step, tier: Tier) -> AttemptRecord {
        let start = Instant::now();
        let backstop = self.tier_timeout + BACKSTOP_GRACE;
        match tokio::time::timeout(backstop, self.executor(tier).execute(driver, step)).await {
            Ok(record) => record,
            Err(_) => {
                warn!("{} 执行器未在预算内返回，已强制结束", tier);
                AttemptRecord::failed(
                    tier,
                    start.elapsed().as_millis() as u64,
                    TierError::new(
                        TierErrorKind::ExecutionTimeout,
                        format!("{} 超过 {}ms 未完成", tier, backstop.as_millis()),
                    ),
                )
            }
        }
    }
}
