//! # Tiered Step Runner
//!
//! 分层执行浏览器自动化步骤：确定性定位器优先，失败后逐层升级到 AI
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力
//! - `BrowserDriver` - 确定性浏览器驱动接口
//! - `ChromiumDriver` / `JsExecutor` - 基于 chromiumoxide 的实现
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个步骤
//! - `LocatorCache` - (页面, 指令) → 定位器缓存
//! - `AiAgent` / `LlmAgent` - 解析定位器、委托执行
//! - `JsonlAnalyticsWriter` / `TierAnalytics` - 分析记录
//!
//! ### ③ 执行层级（Tiers）
//! - `tiers/` - Tier-1 直接执行 / Tier-2 缓存+AI 解析 / Tier-3 AI 委托
//!
//! ### ④ 流程层（Workflow）
//! - `workflow/` - 定义"一个步骤"的完整降级流程
//! - `StepCtx` - 上下文封装（run_id + step_index）
//! - `FallbackOrchestrator` - 按策略逐层尝试
//!
//! ### ⑤ 编排层（Orchestration）
//! - `orchestrator/queue` - 优先级队列 + 活跃槽位
//! - `orchestrator/dispatcher` - 调度循环
//! - `orchestrator/run_processor` - 单个运行处理器
//! - `orchestrator/app` - 应用入口
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod tiers;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult, TierError, TierErrorKind};
pub use infrastructure::BrowserDriver;
pub use models::{ActionKind, FallbackStrategy, RunId, RunOutcome, RunReport, Step, StepExecutionResult, Tier};
pub use orchestrator::App;
pub use services::{AiAgent, LocatorCache};
pub use workflow::{FallbackOrchestrator, StepCtx};
