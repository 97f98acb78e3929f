pub mod analytics;
pub mod attempt;
pub mod loaders;
pub mod run;
pub mod step;
pub mod strategy;

pub use analytics::StepAnalyticsRecord;
pub use attempt::{AttemptRecord, StepExecutionResult, TierMetadata};
pub use loaders::{load_all_run_files, load_run_definition};
pub use run::{
    QueuedRun, RunDefinition, RunId, RunOutcome, RunReport, RunSnapshot, RunState, StatusSnapshot,
    Submission,
};
pub use step::{ActionKind, Step};
pub use strategy::{FallbackStrategy, Tier};
