use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;
use crate::models::FallbackStrategy;

/// 浏览器会话模式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrowserMode {
    /// 连接到已开启调试端口的浏览器，每个运行打开新页面
    Connect,
    /// 每个运行启动一个独立的无头浏览器
    Headless,
}

impl FromStr for BrowserMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connect" => Ok(BrowserMode::Connect),
            "headless" => Ok(BrowserMode::Headless),
            other => Err(format!("未知的浏览器模式: {}", other)),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    // --- 队列 / 调度 ---
    /// 同时活跃的运行数量上限
    pub max_concurrent_runs: usize,
    /// 调度循环轮询间隔
    pub dispatch_poll_interval_ms: u64,
    /// 停止调度器时等待循环退出的上限
    pub dispatcher_join_timeout_ms: u64,
    // --- 执行 ---
    /// 每个层级独立的超时时间
    pub tier_timeout_ms: u64,
    /// 默认降级策略
    pub fallback_strategy: FallbackStrategy,
    /// 某一步失败后是否终止整个运行
    pub stop_on_step_failure: bool,
    /// 普通动作后的稳定等待
    pub settle_delay_ms: u64,
    /// 导航类点击后的最小等待
    pub nav_min_delay_ms: u64,
    /// 导航类点击稳定流程结束后的等待
    pub nav_post_delay_ms: u64,
    // --- 定位器缓存 ---
    pub cache_ttl_hours: u64,
    /// 连续失败多少次后失效
    pub cache_failure_threshold: u32,
    pub cache_snapshot_file: String,
    // --- 浏览器 ---
    pub browser_mode: BrowserMode,
    /// 浏览器调试端口
    pub browser_debug_port: u16,
    pub chrome_executable: Option<String>,
    // --- 输入输出 ---
    /// 运行定义（TOML）存放目录
    pub runs_folder: String,
    pub analytics_file: String,
    /// 输出日志文件
    pub output_log_file: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 2,
            dispatch_poll_interval_ms: 2_000,
            dispatcher_join_timeout_ms: 10_000,
            tier_timeout_ms: 30_000,
            fallback_strategy: FallbackStrategy::C,
            stop_on_step_failure: true,
            settle_delay_ms: 300,
            nav_min_delay_ms: 1_000,
            nav_post_delay_ms: 500,
            cache_ttl_hours: 168,
            cache_failure_threshold: 3,
            cache_snapshot_file: "locator_cache.json".to_string(),
            browser_mode: BrowserMode::Connect,
            browser_debug_port: 9222,
            chrome_executable: None,
            runs_folder: "runs".to_string(),
            analytics_file: "tier_analytics.jsonl".to_string(),
            output_log_file: "output.txt".to_string(),
            verbose_logging: false,
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_runs: env_parse("MAX_CONCURRENT_RUNS", default.max_concurrent_runs).max(1),
            dispatch_poll_interval_ms: env_parse("DISPATCH_POLL_INTERVAL_MS", default.dispatch_poll_interval_ms),
            dispatcher_join_timeout_ms: env_parse("DISPATCHER_JOIN_TIMEOUT_MS", default.dispatcher_join_timeout_ms),
            tier_timeout_ms: env_parse("TIER_TIMEOUT_MS", default.tier_timeout_ms),
            fallback_strategy: env_parse("FALLBACK_STRATEGY", default.fallback_strategy),
            stop_on_step_failure: env_parse("STOP_ON_STEP_FAILURE", default.stop_on_step_failure),
            settle_delay_ms: env_parse("SETTLE_DELAY_MS", default.settle_delay_ms),
            nav_min_delay_ms: env_parse("NAV_MIN_DELAY_MS", default.nav_min_delay_ms),
            nav_post_delay_ms: env_parse("NAV_POST_DELAY_MS", default.nav_post_delay_ms),
            cache_ttl_hours: env_parse("CACHE_TTL_HOURS", default.cache_ttl_hours),
            cache_failure_threshold: env_parse("CACHE_FAILURE_THRESHOLD", default.cache_failure_threshold).max(1),
            cache_snapshot_file: std::env::var("CACHE_SNAPSHOT_FILE").unwrap_or(default.cache_snapshot_file),
            browser_mode: env_parse("BROWSER_MODE", default.browser_mode),
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT", default.browser_debug_port),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok().or(default.chrome_executable),
            runs_folder: std::env::var("RUNS_FOLDER").unwrap_or(default.runs_folder),
            analytics_file: std::env::var("ANALYTICS_FILE").unwrap_or(default.analytics_file),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            verbose_logging: env_parse("VERBOSE_LOGGING", default.verbose_logging),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
        }
    }

    /// 检查取值之间的约束
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tier_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "TIER_TIMEOUT_MS".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.dispatch_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "DISPATCH_POLL_INTERVAL_MS".to_string(),
                reason: "必须大于 0".to_string(),
            });
        }
        if self.llm_api_key.trim().is_empty() {
            warn!("LLM_API_KEY 未设置，Tier-2/Tier-3 的 AI 调用将会失败");
        }
        Ok(())
    }

    pub fn tier_timeout(&self) -> Duration {
        Duration::from_millis(self.tier_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatcher_join_timeout_ms)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours as i64)
    }
}

/// 读取环境变量并解析；解析失败时记录警告并回退到默认值
fn env_parse<T>(var_name: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(var_name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                let err = ConfigError::EnvVarParseFailed {
                    var_name: var_name.to_string(),
                    value: raw,
                    expected_type: std::any::type_name::<T>().to_string(),
                };
                warn!("{}，使用默认值", err);
                default
            }
        },
        Err(_) => default,
    }
}
