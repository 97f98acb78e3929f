//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责运行的排队、准入和调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `queue` - 执行队列
//! - 按优先级和入队顺序保存待执行的运行
//! - 管理活跃槽位（准入/释放在同一把锁内完成）
//!
//! ### `dispatcher` - 队列调度器
//! - 轮询或被通知时准入运行
//! - 每个运行在独立任务中执行，完成守卫负责释放槽位
//!
//! ### `run_processor` - 单个运行处理器
//! - 打开独立浏览器会话
//! - 顺序执行步骤，在步骤边界响应取消
//!
//! ### `app` - 应用入口
//! - 组装所有组件，提供提交/取消/查询接口
//!
//! ## 层次关系
//!
//! ```text
//! app (提交 / 查询)
//!     ↓
//! queue + dispatcher (排队 / 准入)
//!     ↓
//! run_processor (处理 Vec<Step>)
//!     ↓
//! workflow::FallbackOrchestrator (处理单个 Step)
//!     ↓
//! tiers (Tier-1 / Tier-2 / Tier-3)
//!     ↓
//! services (能力层：缓存 / AI / 分析)
//!     ↓
//! infrastructure (基础设施：BrowserDriver)
//! ```

pub mod app;
pub mod dispatcher;
pub mod queue;
pub mod run_processor;

pub use app::App;
pub use dispatcher::QueueDispatcher;
pub use queue::ExecutionQueue;
pub use run_processor::{process_run, BrowserRunExecutor, RunExecutor};
