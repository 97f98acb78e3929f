//! 降级策略与执行层级

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// 执行层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// 第一层：调用方提供的确定性定位器
    Direct,
    /// 第二层：缓存 + AI 解析定位器
    Hybrid,
    /// 第三层：整步交给 AI 执行
    Delegated,
}

impl Tier {
    pub fn number(self) -> u8 {
        match self {
            Tier::Direct => 1,
            Tier::Hybrid => 2,
            Tier::Delegated => 3,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tier-{}", self.number())
    }
}

const STRATEGY_A: [Tier; 2] = [Tier::Direct, Tier::Hybrid];
const STRATEGY_B: [Tier; 2] = [Tier::Direct, Tier::Delegated];
const STRATEGY_C: [Tier; 3] = [Tier::Direct, Tier::Hybrid, Tier::Delegated];

/// 降级策略
///
/// 每个策略都以 Tier-1 开头，之后的升级顺序作为数据保存在 `tiers()` 中。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FallbackStrategy {
    /// Tier-1 → Tier-2
    #[serde(alias = "a")]
    A,
    /// Tier-1 → Tier-3
    #[serde(alias = "b")]
    B,
    /// Tier-1 → Tier-2 → Tier-3
    #[default]
    #[serde(alias = "c")]
    C,
}

impl FallbackStrategy {
    /// 按尝试顺序排列的层级
    pub fn tiers(self) -> &'static [Tier] {
        match self {
            FallbackStrategy::A => &STRATEGY_A,
            FallbackStrategy::B => &STRATEGY_B,
            FallbackStrategy::C => &STRATEGY_C,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FallbackStrategy::A => "A",
            FallbackStrategy::B => "B",
            FallbackStrategy::C => "C",
        }
    }
}

impl fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FallbackStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(FallbackStrategy::A),
            "B" => Ok(FallbackStrategy::B),
            "C" => Ok(FallbackStrategy::C),
            other => Err(AppError::Validation(format!("未知的降级策略: {}", other))),
        }
    }
}
