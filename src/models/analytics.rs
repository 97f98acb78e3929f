//! 层级分析记录（对外的逻辑记录形态）

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::attempt::StepExecutionResult;
use crate::models::run::RunId;
use crate::models::strategy::{FallbackStrategy, Tier};
use crate::utils::logging::truncate_text;

/// 错误信息截断长度
pub const ERROR_TRUNCATE_LEN: usize = 500;

/// 每个步骤一条的分析记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAnalyticsRecord {
    pub run_id: RunId,
    pub step_index: usize,
    pub strategy: FallbackStrategy,
    /// 成功的层级编号（1/2/3），全部失败时为 None
    pub final_tier: Option<u8>,
    pub success: bool,
    /// 层级编号 → 耗时
    pub tier_latency_ms: BTreeMap<u8, u64>,
    /// 层级编号 → 截断后的错误信息
    pub tier_errors: BTreeMap<u8, String>,
    /// Tier-2 是否命中定位器缓存，未尝试 Tier-2 时为 None
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    pub total_latency_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

impl StepAnalyticsRecord {
    pub fn from_result(run_id: RunId, step_index: usize, result: &StepExecutionResult) -> Self {
        let mut tier_latency_ms = BTreeMap::new();
        let mut tier_errors = BTreeMap::new();
        for attempt in &result.history {
            tier_latency_ms.insert(attempt.tier.number(), attempt.latency_ms);
            if let Some(err) = &attempt.error {
                tier_errors.insert(
                    attempt.tier.number(),
                    truncate_text(&err.to_string(), ERROR_TRUNCATE_LEN),
                );
            }
        }

        Self {
            run_id,
            step_index,
            strategy: result.strategy,
            final_tier: result.final_tier.map(|t| t.number()),
            success: result.success,
            tier_latency_ms,
            tier_errors,
            cache_hit: result
                .attempt(Tier::Hybrid)
                .and_then(|attempt| attempt.metadata.cache_hit),
            total_latency_ms: result.total_latency_ms,
            recorded_at: Utc::now(),
        }
    }
}
