//! 层级尝试记录与步骤执行结果

use serde::{Deserialize, Serialize};

use crate::error::{TierError, TierErrorKind};
use crate::models::strategy::{FallbackStrategy, Tier};

/// 层级特有的元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierMetadata {
    /// Tier-2：是否命中缓存
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    /// 实际使用的定位器
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_locator: Option<String>,
    /// Tier-2：AI 解析定位器耗时（命中缓存时为 0）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_latency_ms: Option<u64>,
    /// 确定性动作执行耗时
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_latency_ms: Option<u64>,
}

/// 单个层级的一次尝试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub tier: Tier,
    pub success: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TierError>,
    #[serde(default)]
    pub metadata: TierMetadata,
}

impl AttemptRecord {
    pub fn succeeded(tier: Tier, latency_ms: u64) -> Self {
        Self {
            tier,
            success: true,
            latency_ms,
            error: None,
            metadata: TierMetadata::default(),
        }
    }

    pub fn failed(tier: Tier, latency_ms: u64, error: TierError) -> Self {
        Self {
            tier,
            success: false,
            latency_ms,
            error: Some(error),
            metadata: TierMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: TierMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn error_kind(&self) -> Option<TierErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// 单个步骤的执行结果：所有尝试记录的汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionResult {
    pub strategy: FallbackStrategy,
    /// 成功的层级（全部失败时为 None）
    pub final_tier: Option<Tier>,
    pub success: bool,
    pub total_latency_ms: u64,
    /// 按尝试顺序排列的完整历史
    pub history: Vec<AttemptRecord>,
    /// 失败时的最终错误
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TierError>,
}

impl StepExecutionResult {
    pub fn attempted_tiers(&self) -> Vec<Tier> {
        self.history.iter().map(|a| a.tier).collect()
    }

    /// 某个层级的尝试记录
    pub fn attempt(&self, tier: Tier) -> Option<&AttemptRecord> {
        self.history.iter().find(|a| a.tier == tier)
    }

    /// 给人看的失败摘要：每个层级为什么失败
    pub fn failure_summary(&self) -> String {
        self.history
            .iter()
            .map(|a| match &a.error {
                Some(err) => format!("{} ✗ {}", a.tier, err),
                None => format!("{} ✓", a.tier),
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }
}
