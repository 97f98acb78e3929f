pub mod ai_agent;
pub mod analytics;
pub mod llm_service;
pub mod locator_cache;
pub mod tier_stats;

pub use ai_agent::{AiAgent, LlmAgent, PerformOutcome, ResolvedLocator};
pub use analytics::{AnalyticsSink, JsonlAnalyticsWriter};
pub use llm_service::LlmService;
pub use locator_cache::{cache_key, CacheEntry, CacheStats, LocatorCache};
pub use tier_stats::{TierAnalytics, TierStats, TierSummary};
