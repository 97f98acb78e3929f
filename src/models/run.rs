//! 运行（Run）相关模型
//!
//! 一次运行 = 一组按顺序执行的步骤，经过队列准入后占用一个活跃槽位

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::attempt::StepExecutionResult;
use crate::models::step::Step;
use crate::models::strategy::FallbackStrategy;

/// 运行 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// 日志使用的短 ID
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 排队中的运行
///
/// `priority` 越小越先被服务；同优先级按 `seq`（入队顺序）先进先出。
#[derive(Debug, Clone)]
pub struct QueuedRun {
    pub id: RunId,
    pub priority: i64,
    pub enqueued_at: DateTime<Utc>,
    /// 入队序号，由队列在首次入队时分配
    pub seq: u64,
    pub owner_id: String,
    pub subject_id: String,
    /// 运行级别的策略覆盖
    pub strategy: Option<FallbackStrategy>,
    pub steps: Arc<Vec<Step>>,
    pub cancel: CancellationToken,
}

impl QueuedRun {
    pub fn new(
        steps: Vec<Step>,
        priority: i64,
        owner_id: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            id: RunId::new(),
            priority,
            enqueued_at: Utc::now(),
            seq: 0,
            owner_id: owner_id.into(),
            subject_id: subject_id.into(),
            strategy: None,
            steps: Arc::new(steps),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Option<FallbackStrategy>) -> Self {
        self.strategy = strategy;
        self
    }
}

/// 提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub run_id: RunId,
    /// 近似的排队位置（从 1 开始），仅供参考
    pub position: usize,
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Active,
}

/// 单个运行的状态快照
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub state: RunState,
    pub priority: i64,
    pub owner_id: String,
    pub subject_id: String,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admitted_at: Option<DateTime<Utc>>,
    /// 仅对排队中的运行有意义（近似值）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
}

/// 队列整体状态快照
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub active_count: usize,
    pub queued_count: usize,
    pub max_active: usize,
    pub runs: Vec<RunSnapshot>,
}

/// 运行结局
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Passed,
    Failed { step_index: usize },
    Cancelled,
    Crashed { message: String },
}

impl RunOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, RunOutcome::Passed)
    }
}

/// 运行报告：每一步尝试了哪些层级、为什么失败、哪一层成功
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    pub steps: Vec<StepExecutionResult>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(run_id: RunId, outcome: RunOutcome, steps: Vec<StepExecutionResult>, duration_ms: u64) -> Self {
        Self {
            run_id,
            outcome,
            steps,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    pub fn crashed(run_id: RunId, message: impl Into<String>) -> Self {
        Self::new(
            run_id,
            RunOutcome::Crashed {
                message: message.into(),
            },
            Vec::new(),
            0,
        )
    }
}

/// 从文件加载的运行定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDefinition {
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<FallbackStrategy>,
    pub steps: Vec<Step>,
    #[serde(skip_serializing, skip_deserializing)]
    pub file_path: Option<String>,
}

fn default_priority() -> i64 {
    10
}
