use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 浏览器相关错误
    #[error("浏览器错误: {0}")]
    Browser(#[from] DriverError),
    /// AI 协作方错误
    #[error("AI 错误: {0}")]
    Agent(#[from] AgentError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 队列错误
    #[error("队列错误: {0}")]
    Queue(String),
    /// 步骤或运行定义不合法
    #[error("校验失败: {0}")]
    Validation(String),
    /// 文件操作错误
    #[error("文件错误 ({path}): {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// JSON 解析失败
    #[error("JSON解析失败: {0}")]
    Json(#[from] serde_json::Error),
    /// TOML 解析失败
    #[error("TOML解析失败: {0}")]
    Toml(#[from] toml::de::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::File {
            path: String::new(),
            source: err,
        }
    }
}

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AppError::Browser(DriverError::from(err))
    }
}

impl AppError {
    /// 创建文件读取错误
    pub fn file_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File {
            path: path.into(),
            source,
        }
    }
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

/// 浏览器驱动错误
#[derive(Debug, Error)]
pub enum DriverError {
    /// 在超时时间内操作未完成
    #[error("{operation} 超时 ({timeout_ms}ms)")]
    Timeout { operation: String, timeout_ms: u64 },
    /// 找不到元素
    #[error("找不到元素: {0}")]
    ElementNotFound(String),
    /// 定位器语法不合法
    #[error("定位器不合法: {0}")]
    InvalidLocator(String),
    /// 导航失败
    #[error("导航到 {url} 失败: {message}")]
    NavigationFailed { url: String, message: String },
    /// CDP 协议错误
    #[error("CDP 错误: {0}")]
    Protocol(String),
    /// 执行脚本失败
    #[error("执行脚本失败: {0}")]
    Script(String),
}

impl DriverError {
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        DriverError::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

impl From<chromiumoxide::error::CdpError> for DriverError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        DriverError::Protocol(err.to_string())
    }
}

/// AI 协作方错误
#[derive(Debug, Error)]
pub enum AgentError {
    /// API 调用失败
    #[error("LLM API调用失败 (模型: {model}): {message}")]
    ApiCallFailed { model: String, message: String },
    /// 返回内容为空
    #[error("LLM返回内容为空 (模型: {model})")]
    EmptyContent { model: String },
    /// 无法从响应中解析出结构化结果
    #[error("无法解析LLM响应: {0}")]
    UnparsableResponse(String),
    /// 模型给出的定位器在页面上不存在
    #[error("LLM给出的定位器在页面上不存在: {0}")]
    LocatorNotOnPage(String),
    /// 模型认为页面上没有匹配的元素
    #[error("LLM未找到匹配元素: {0}")]
    NoMatch(String),
    /// 读取页面失败
    #[error("读取页面失败: {0}")]
    Page(#[from] DriverError),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
    /// 取值不合法
    #[error("配置项 {name} 不合法: {reason}")]
    Invalid { name: String, reason: String },
}

// ========== 层级执行错误（进入尝试记录，不向上抛出） ==========

/// 层级执行错误种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierErrorKind {
    /// Tier-1 需要定位器但步骤未提供
    NoLocatorProvided,
    /// Tier-2/3 需要指令但步骤未提供
    NoInstructionProvided,
    /// 缓存未命中且 AI 解析失败
    ResolutionFailed,
    /// 动作在层级超时时间内未完成
    ExecutionTimeout,
    /// 动作执行了但后置条件不满足
    ExecutionFailed,
    /// 策略中的所有层级均失败
    AllTiersExhausted,
    /// 上传文件不存在
    FileNotFound,
    /// 运行在步骤边界被取消
    Cancelled,
}

impl TierErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TierErrorKind::NoLocatorProvided => "no_locator_provided",
            TierErrorKind::NoInstructionProvided => "no_instruction_provided",
            TierErrorKind::ResolutionFailed => "resolution_failed",
            TierErrorKind::ExecutionTimeout => "execution_timeout",
            TierErrorKind::ExecutionFailed => "execution_failed",
            TierErrorKind::AllTiersExhausted => "all_tiers_exhausted",
            TierErrorKind::FileNotFound => "file_not_found",
            TierErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 层级执行错误
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TierError {
    pub kind: TierErrorKind,
    pub message: String,
}

impl TierError {
    pub fn new(kind: TierErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn no_locator() -> Self {
        Self::new(TierErrorKind::NoLocatorProvided, "步骤未提供定位器")
    }

    pub fn no_instruction() -> Self {
        Self::new(TierErrorKind::NoInstructionProvided, "步骤未提供自然语言指令")
    }

    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(TierErrorKind::ExecutionFailed, message)
    }
}

impl From<DriverError> for TierError {
    fn from(err: DriverError) -> Self {
        let kind = if err.is_timeout() {
            TierErrorKind::ExecutionTimeout
        } else {
            TierErrorKind::ExecutionFailed
        };
        TierError::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_timeout_maps_to_execution_timeout() {
        let err: TierError = DriverError::timeout("click #go", 30_000).into();
        assert_eq!(err.kind, TierErrorKind::ExecutionTimeout);

        let err: TierError = DriverError::ElementNotFound("#gone".into()).into();
        assert_eq!(err.kind, TierErrorKind::ExecutionFailed);
    }
}
