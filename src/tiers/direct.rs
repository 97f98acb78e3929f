//! Tier-1：确定性执行

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Config;
use crate::error::TierError;
use crate::infrastructure::BrowserDriver;
use crate::models::{AttemptRecord, Step, Tier, TierMetadata};
use crate::tiers::{elapsed_ms, within_budget, ActionRunner, TierExecutor};

/// 使用调用方提供的定位器直接执行
pub struct DirectExecutor {
    runner: ActionRunner,
    timeout: Duration,
}

impl DirectExecutor {
    pub fn new(config: &Config) -> Self {
        Self::with_runner(ActionRunner::new(config), config.tier_timeout())
    }

    pub fn with_runner(runner: ActionRunner, timeout: Duration) -> Self {
        Self { runner, timeout }
    }
}

#[async_trait]
impl TierExecutor for DirectExecutor {
    fn tier(&self) -> Tier {
        Tier::Direct
    }

    async fn execute(&self, driver: &dyn BrowserDriver, step: &Step) -> AttemptRecord {
        let start = Instant::now();
        let locator = step.locator();

        // 没有定位器时立即失败，让编排器升级
        if step.needs_locator() && locator.is_none() {
            debug!("Tier-1 跳过: {} 没有定位器", step.label());
            return AttemptRecord::failed(Tier::Direct, elapsed_ms(start), TierError::no_locator());
        }

        let result = within_budget(
            Tier::Direct,
            self.timeout,
            self.runner.run(driver, step, locator, self.timeout),
        )
        .await;
        let latency = elapsed_ms(start);
        let metadata = TierMetadata {
            resolved_locator: locator.map(str::to_string),
            execution_latency_ms: Some(latency),
            ..Default::default()
        };

        match result {
            Ok(()) => AttemptRecord::succeeded(Tier::Direct, latency).with_metadata(metadata),
            Err(e) => {
                debug!("Tier-1 失败: {} ({})", step.label(), e);
                AttemptRecord::failed(Tier::Direct, latency, e).with_metadata(metadata)
            }
        }
    }
}
