pub mod step_ctx;
pub mod step_flow;

pub use step_ctx::StepCtx;
pub use step_flow::FallbackOrchestrator;
