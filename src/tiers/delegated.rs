//! Tier-3：整步委托给 AI 协作方
//!
//! 不使用定位器，也不读写缓存。

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{TierError, TierErrorKind};
use crate::infrastructure::BrowserDriver;
use crate::models::{ActionKind, AttemptRecord, Step, Tier};
use crate::services::AiAgent;
use crate::tiers::{elapsed_ms, within_budget, TierExecutor};

pub struct DelegatedExecutor {
    agent: Arc<dyn AiAgent>,
    timeout: Duration,
}

impl DelegatedExecutor {
    pub fn new(agent: Arc<dyn AiAgent>, timeout: Duration) -> Self {
        Self { agent, timeout }
    }
}

#[async_trait]
impl TierExecutor for DelegatedExecutor {
    fn tier(&self) -> Tier {
        Tier::Delegated
    }

    async fn execute(&self, driver: &dyn BrowserDriver, step: &Step) -> AttemptRecord {
        let start = Instant::now();

        let Some(instruction) = step.instruction() else {
            return AttemptRecord::failed(Tier::Delegated, elapsed_ms(start), TierError::no_instruction());
        };

        let value = if step.action == ActionKind::UploadFile {
            match step.file_path.as_deref() {
                Some(path) if Path::new(path).is_file() => Some(path),
                other => {
                    return AttemptRecord::failed(
                        Tier::Delegated,
                        elapsed_ms(start),
                        TierError::new(
                            TierErrorKind::FileNotFound,
                            format!("文件不存在: {}", other.unwrap_or("<未提供>")),
                        ),
                    );
                }
            }
        } else {
            step.value.as_deref()
        };

        let perform = async {
            Ok::<_, TierError>(self
                .agent
                .perform_instruction(driver, instruction, step.action, value)
                .await)
        };
        let outcome = match within_budget(Tier::Delegated, self.timeout, perform).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Tier-3 超时: {} ({})", step.label(), e);
                return AttemptRecord::failed(Tier::Delegated, elapsed_ms(start), e);
            }
        };

        if outcome.success {
            AttemptRecord::succeeded(Tier::Delegated, outcome.latency_ms)
        } else {
            let message = outcome
                .error
                .unwrap_or_else(|| "AI 协作方未能完成指令".to_string());
            debug!("Tier-3 失败: {} ({})", step.label(), message);
            AttemptRecord::failed(
                Tier::Delegated,
                outcome.latency_ms,
                TierError::execution_failed(message),
            )
        }
    }
}
