//! 步骤执行上下文
//!
//! 封装"我正在执行哪个运行的第几步"这一信息

use std::fmt::Display;

use crate::models::RunId;

/// 步骤执行上下文
#[derive(Debug, Clone, Copy)]
pub struct StepCtx {
    pub run_id: RunId,

    /// 步骤在运行中的索引（从0开始）
    pub step_index: usize,

    /// 运行中的步骤总数（仅用于日志显示）
    pub step_total: usize,
}

impl StepCtx {
    pub fn new(run_id: RunId, step_index: usize, step_total: usize) -> Self {
        Self {
            run_id,
            step_index,
            step_total,
        }
    }
}

impl Display for StepCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[运行 {} 步骤 {}/{}]",
            self.run_id.short(),
            self.step_index + 1,
            self.step_total
        )
    }
}
