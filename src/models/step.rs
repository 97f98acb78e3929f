//! 测试步骤模型
//!
//! 一个 `Step` 描述"做什么"（动作）以及"对谁做"（定位器 / 自然语言指令）

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// 步骤动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Click,
    Fill,
    Select,
    Check,
    Uncheck,
    Hover,
    Assert,
    Wait,
    UploadFile,
}

impl ActionKind {
    /// 该动作是否需要一个目标元素
    ///
    /// `navigate` 使用 `value` 作为 URL，`wait` 可以只是一个数值延迟，
    /// 其余动作都必须落在某个元素上。
    pub fn needs_target(self) -> bool {
        !matches!(self, ActionKind::Navigate | ActionKind::Wait)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Click => "click",
            ActionKind::Fill => "fill",
            ActionKind::Select => "select",
            ActionKind::Check => "check",
            ActionKind::Uncheck => "uncheck",
            ActionKind::Hover => "hover",
            ActionKind::Assert => "assert",
            ActionKind::Wait => "wait",
            ActionKind::UploadFile => "upload_file",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "navigate" | "goto" => Ok(ActionKind::Navigate),
            "click" => Ok(ActionKind::Click),
            "fill" | "type" => Ok(ActionKind::Fill),
            "select" | "select_option" => Ok(ActionKind::Select),
            "check" => Ok(ActionKind::Check),
            "uncheck" => Ok(ActionKind::Uncheck),
            "hover" => Ok(ActionKind::Hover),
            "assert" | "assert_text" => Ok(ActionKind::Assert),
            "wait" => Ok(ActionKind::Wait),
            "upload_file" | "upload" => Ok(ActionKind::UploadFile),
            other => Err(AppError::Validation(format!("未知的动作类型: {}", other))),
        }
    }
}

/// 单个测试步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: ActionKind,
    /// 确定性定位器（CSS / XPath / text=）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    /// 自然语言指令，用于缓存寻址和 AI 解析
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// 输入值 / 期望文本 / URL / 等待毫秒数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// upload_file 使用的本地文件路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Step {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            locator: None,
            instruction: None,
            value: None,
            file_path: None,
            description: None,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(ActionKind::Navigate).with_value(url)
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_file_path(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// 非空定位器
    pub fn locator(&self) -> Option<&str> {
        non_blank(self.locator.as_deref())
    }

    /// 非空指令
    pub fn instruction(&self) -> Option<&str> {
        non_blank(self.instruction.as_deref())
    }

    /// wait 步骤给出的毫秒数
    pub fn wait_ms(&self) -> Option<u64> {
        self.value.as_deref().and_then(|v| v.trim().parse().ok())
    }

    /// 执行时是否需要定位器：需要目标的动作，以及没有给出毫秒数的 wait
    pub fn needs_locator(&self) -> bool {
        match self.action {
            ActionKind::Wait => self.wait_ms().is_none(),
            action => action.needs_target(),
        }
    }

    /// 校验步骤：需要目标的动作至少要有定位器或指令之一
    pub fn validate(&self) -> Result<(), AppError> {
        if self.needs_locator() && self.locator().is_none() && self.instruction().is_none() {
            return Err(AppError::Validation(format!(
                "动作 {} 需要目标元素，但既没有 locator 也没有 instruction",
                self.action
            )));
        }
        if self.action == ActionKind::Navigate && non_blank(self.value.as_deref()).is_none() {
            return Err(AppError::Validation("navigate 步骤缺少 URL (value)".to_string()));
        }
        if self.action == ActionKind::UploadFile && non_blank(self.file_path.as_deref()).is_none() {
            return Err(AppError::Validation("upload_file 步骤缺少 file_path".to_string()));
        }
        Ok(())
    }

    /// 日志中使用的简短描述
    pub fn label(&self) -> String {
        if let Some(desc) = non_blank(self.description.as_deref()) {
            return format!("{} ({})", self.action, desc);
        }
        match (self.locator(), self.instruction()) {
            (_, Some(instruction)) => format!("{} \"{}\"", self.action, instruction),
            (Some(locator), None) => format!("{} {}", self.action, locator),
            (None, None) => match self.value.as_deref() {
                Some(value) => format!("{} {}", self.action, value),
                None => self.action.to_string(),
            },
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
