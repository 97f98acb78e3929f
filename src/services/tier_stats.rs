//! 层级统计 - 业务能力层
//!
//! 在内存中汇总所有运行的步骤分析记录，用于最终统计输出

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::models::{StepAnalyticsRecord, Tier};
use crate::services::analytics::AnalyticsSink;

const ALL_TIERS: [Tier; 3] = [Tier::Direct, Tier::Hybrid, Tier::Delegated];

/// 单个层级的统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub tier: Tier,
    pub attempts: u64,
    pub failures: u64,
    /// 作为最终成功层的次数
    pub final_successes: u64,
    pub total_latency_ms: u64,
}

impl TierStats {
    fn new(tier: Tier) -> Self {
        Self {
            tier,
            attempts: 0,
            failures: 0,
            final_successes: 0,
            total_latency_ms: 0,
        }
    }

    pub fn average_latency_ms(&self) -> u64 {
        if self.attempts == 0 {
            0
        } else {
            self.total_latency_ms / self.attempts
        }
    }
}

/// 汇总结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierSummary {
    pub steps: u64,
    pub successes: u64,
    /// 全部层级都失败的步骤数
    pub exhausted: u64,
    pub tiers: Vec<TierStats>,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

impl Default for TierSummary {
    fn default() -> Self {
        Self {
            steps: 0,
            successes: 0,
            exhausted: 0,
            tiers: ALL_TIERS.iter().map(|t| TierStats::new(*t)).collect(),
            cache_hits: 0,
            cache_misses: 0,
        }
    }
}

impl TierSummary {
    pub fn tier(&self, tier: Tier) -> Option<&TierStats> {
        self.tiers.iter().find(|s| s.tier == tier)
    }
}

/// 进程内层级统计
#[derive(Default)]
pub struct TierAnalytics {
    summary: Mutex<TierSummary>,
}

impl TierAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, record: &StepAnalyticsRecord) {
        let mut summary = self.summary.lock();
        summary.steps += 1;
        if record.success {
            summary.successes += 1;
        } else {
            summary.exhausted += 1;
        }
        match record.cache_hit {
            Some(true) => summary.cache_hits += 1,
            Some(false) => summary.cache_misses += 1,
            None => {}
        }

        for stats in summary.tiers.iter_mut() {
            let number = stats.tier.number();
            if let Some(latency) = record.tier_latency_ms.get(&number) {
                stats.attempts += 1;
                stats.total_latency_ms += latency;
                if record.tier_errors.contains_key(&number) {
                    stats.failures += 1;
                }
            }
            if record.final_tier == Some(number) {
                stats.final_successes += 1;
            }
        }
    }

    pub fn summary(&self) -> TierSummary {
        self.summary.lock().clone()
    }
}

#[async_trait]
impl AnalyticsSink for TierAnalytics {
    async fn record(&self, record: &StepAnalyticsRecord) -> Result<()> {
        self.observe(record);
        Ok(())
    }
}
