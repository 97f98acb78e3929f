//! Tier-2：缓存 + AI 解析定位器
//!
//! 流程：
//! 1. 以 (当前页面 URL, 指令) 查询定位器缓存
//! 2. 命中 → 使用缓存的定位器
//! 3. 未命中 → 请 AI 协作方解析；成功写入缓存，失败则本层失败（绝不编造定位器）
//! 4. 用确定性动作逻辑执行
//! 5. 命中缓存时把执行结果回报给缓存（包括超出层级预算的情况）

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{TierError, TierErrorKind};
use crate::infrastructure::BrowserDriver;
use crate::models::{AttemptRecord, Step, Tier, TierMetadata};
use crate::services::{AiAgent, LocatorCache};
use crate::tiers::{elapsed_ms, remaining, within_budget, ActionRunner, TierExecutor};

pub struct HybridExecutor {
    runner: ActionRunner,
    cache: Arc<LocatorCache>,
    agent: Arc<dyn AiAgent>,
    timeout: Duration,
}

impl HybridExecutor {
    pub fn new(config: &Config, cache: Arc<LocatorCache>, agent: Arc<dyn AiAgent>) -> Self {
        Self::with_runner(ActionRunner::new(config), cache, agent, config.tier_timeout())
    }

    pub fn with_runner(
        runner: ActionRunner,
        cache: Arc<LocatorCache>,
        agent: Arc<dyn AiAgent>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            cache,
            agent,
            timeout,
        }
    }
}

#[async_trait]
impl TierExecutor for HybridExecutor {
    fn tier(&self) -> Tier {
        Tier::Hybrid
    }

    async fn execute(&self, driver: &dyn BrowserDriver, step: &Step) -> AttemptRecord {
        let start = Instant::now();

        // 不需要定位器的步骤与 Tier-1 相同，不经过缓存
        if !step.needs_locator() {
            let run = self.runner.run(driver, step, None, self.timeout);
            return match within_budget(Tier::Hybrid, self.timeout, run).await {
                Ok(()) => AttemptRecord::succeeded(Tier::Hybrid, elapsed_ms(start)),
                Err(e) => AttemptRecord::failed(Tier::Hybrid, elapsed_ms(start), e),
            };
        }

        let Some(instruction) = step.instruction() else {
            debug!("Tier-2 跳过: {} 没有指令", step.label());
            return AttemptRecord::failed(Tier::Hybrid, elapsed_ms(start), TierError::no_instruction());
        };

        let current_url = within_budget(Tier::Hybrid, self.timeout, async {
            driver.current_url().await.map_err(TierError::from)
        });
        let page_url = match current_url.await {
            Ok(url) => url,
            Err(e) => return AttemptRecord::failed(Tier::Hybrid, elapsed_ms(start), e),
        };

        let mut metadata = TierMetadata::default();
        let locator = match self.cache.get(&page_url, instruction) {
            Some(entry) => {
                debug!("缓存命中 ({} 次): \"{}\" → {}", entry.hit_count, instruction, entry.locator);
                metadata.cache_hit = Some(true);
                metadata.resolution_latency_ms = Some(0);
                entry.locator
            }
            None => {
                metadata.cache_hit = Some(false);
                let resolve = async {
                    self.agent
                        .resolve_locator(driver, instruction)
                        .await
                        .map_err(|e| TierError::new(TierErrorKind::ResolutionFailed, e.to_string()))
                };
                match within_budget(Tier::Hybrid, remaining(start, self.timeout), resolve).await {
                    Ok(resolved) => {
                        info!("🔎 AI 解析定位器: \"{}\" → {} ({}ms)", instruction, resolved.locator, resolved.latency_ms);
                        metadata.resolution_latency_ms = Some(resolved.latency_ms);
                        self.cache.put(&page_url, instruction, &resolved);
                        resolved.locator
                    }
                    Err(e) => {
                        warn!("AI 解析定位器失败: \"{}\" ({})", instruction, e);
                        metadata.resolution_latency_ms = Some(elapsed_ms(start));
                        return AttemptRecord::failed(Tier::Hybrid, elapsed_ms(start), e).with_metadata(metadata);
                    }
                }
            }
        };

        // 动作只能使用剩余预算，确保超时后仍能把失败回报给缓存
        let exec_start = Instant::now();
        let budget = remaining(start, self.timeout);
        let run = self.runner.run(driver, step, Some(&locator), budget);
        let result = within_budget(Tier::Hybrid, budget, run).await;
        metadata.execution_latency_ms = Some(elapsed_ms(exec_start));
        metadata.resolved_locator = Some(locator);

        if metadata.cache_hit == Some(true) {
            self.cache.mark_outcome(&page_url, instruction, result.is_ok());
        }

        let latency = elapsed_ms(start);
        match result {
            Ok(()) => AttemptRecord::succeeded(Tier::Hybrid, latency).with_metadata(metadata),
            Err(e) => {
                debug!("Tier-2 失败: {} ({})", step.label(), e);
                AttemptRecord::failed(Tier::Hybrid, latency, e).with_metadata(metadata)
            }
        }
    }
}
