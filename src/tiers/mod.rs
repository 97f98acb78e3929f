//! 执行层级
//!
//! - Tier-1 `DirectExecutor`：只使用调用方给出的定位器
//! - Tier-2 `HybridExecutor`：缓存 + AI 解析定位器，再确定性执行
//! - Tier-3 `DelegatedExecutor`：整步交给 AI 协作方
//!
//! 执行器从不向外传播错误，所有结果都体现在 `AttemptRecord` 中。
//! 每个执行器自己负责层级预算：超时也要留下完整的元数据和缓存反馈。

pub mod action_runner;
pub mod delegated;
pub mod direct;
pub mod hybrid;

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{TierError, TierErrorKind};
use crate::infrastructure::BrowserDriver;
use crate::models::{AttemptRecord, Step, Tier};

pub use action_runner::ActionRunner;
pub use delegated::DelegatedExecutor;
pub use direct::DirectExecutor;
pub use hybrid::HybridExecutor;

/// 单个层级的执行器
#[async_trait]
pub trait TierExecutor: Send + Sync {
    fn tier(&self) -> Tier;

    async fn execute(&self, driver: &dyn BrowserDriver, step: &Step) -> AttemptRecord;
}

pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// 预算中剩余的时间
pub(crate) fn remaining(start: Instant, budget: Duration) -> Duration {
    budget.saturating_sub(start.elapsed())
}

/// 在预算内完成，否则记为 `ExecutionTimeout`
pub(crate) async fn within_budget<T, F>(tier: Tier, budget: Duration, fut: F) -> Result<T, TierError>
where
    F: Future<Output = Result<T, TierError>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(TierError::new(
            TierErrorKind::ExecutionTimeout,
            format!("{} 超过 {}ms 未完成", tier, budget.as_millis()),
        )),
    }
}
