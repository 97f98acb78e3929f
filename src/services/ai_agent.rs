//! AI 协作方 - 业务能力层
//!
//! 两种能力：
//! - 把自然语言指令解析成定位器（Tier-2 使用）
//! - 直接按自然语言指令完成整个动作（Tier-3 使用）
//!
//! 两者都使用确定性路径同一个浏览器驱动句柄。

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::AgentError;
use crate::infrastructure::{BrowserDriver, ElementSnapshot};
use crate::models::{ActionKind, Step};
use crate::services::llm_service::LlmService;
use crate::tiers::ActionRunner;

/// 一次成功的定位器解析
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedLocator {
    pub locator: String,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_text: Option<String>,
}

/// 一次委托执行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct PerformOutcome {
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl PerformOutcome {
    pub fn succeeded(latency_ms: u64) -> Self {
        Self {
            success: true,
            latency_ms,
            error: None,
        }
    }

    pub fn failed(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency_ms,
            error: Some(error.into()),
        }
    }
}

/// AI 协作方接口
#[async_trait]
pub trait AiAgent: Send + Sync {
    /// 在当前页面上为指令找到一个可用的定位器
    async fn resolve_locator(
        &self,
        driver: &dyn BrowserDriver,
        instruction: &str,
    ) -> Result<ResolvedLocator, AgentError>;

    /// 自主完成指令描述的动作
    ///
    /// `value` 是动作参数（填写内容、下拉选项、上传文件路径等）。
    async fn perform_instruction(
        &self,
        driver: &dyn BrowserDriver,
        instruction: &str,
        action: ActionKind,
        value: Option<&str>,
    ) -> PerformOutcome;
}

/// 大模型返回的 JSON 答案
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AgentAnswer {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub element_text: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// 响应中第一个 `{` 到最后一个 `}` 之间的内容
static JSON_OBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("JSON 提取正则无效"));

/// 从大模型响应中提取 JSON 答案
///
/// 允许响应被 ```json 代码块包裹或夹在说明文字中间。
pub fn parse_agent_answer(response: &str) -> Result<AgentAnswer, AgentError> {
    let json = JSON_OBJECT_RE
        .find(response)
        .map(|m| m.as_str())
        .ok_or_else(|| AgentError::UnparsableResponse(response.to_string()))?;

    serde_json::from_str::<AgentAnswer>(json)
        .map_err(|e| AgentError::UnparsableResponse(format!("{}: {}", e, json)))
}

/// 基于大模型的 AI 协作方
pub struct LlmAgent {
    llm: LlmService,
    runner: ActionRunner,
    action_timeout: Duration,
    snapshot_limit: usize,
}

impl LlmAgent {
    pub fn new(config: &Config) -> Self {
        Self {
            llm: LlmService::new(config),
            runner: ActionRunner::new(config),
            action_timeout: config.tier_timeout(),
            snapshot_limit: 150,
        }
    }

    /// 采集快照并询问大模型，返回 (答案对应的元素, 答案, 页面标题)
    async fn ask_for_element(
        &self,
        driver: &dyn BrowserDriver,
        instruction: &str,
        task: &str,
    ) -> Result<(ElementSnapshot, AgentAnswer, Option<String>), AgentError> {
        let elements = driver.snapshot(self.snapshot_limit).await?;
        if elements.is_empty() {
            return Err(AgentError::NoMatch("页面上没有可交互元素".to_string()));
        }
        let title = driver.title().await.unwrap_or(None);
        let url = driver.current_url().await.unwrap_or_default();

        let (user_message, system_message) = build_messages(&url, title.as_deref(), &elements, instruction, task);
        let response = self.llm.send_to_llm(&user_message, Some(&system_message)).await?;
        debug!("LLM 响应: {}", response);

        let answer = parse_agent_answer(&response)?;
        let element = pick_element(&elements, &answer)
            .ok_or_else(|| AgentError::NoMatch(format!("\"{}\": {}", instruction, response)))?;

        // 模型给出的选择器必须在当前页面上真实存在
        let count = driver.element_count(&element.selector).await?;
        if count == 0 {
            return Err(AgentError::LocatorNotOnPage(element.selector));
        }
        if count > 1 {
            debug!("选择器 {} 匹配到 {} 个元素，使用第一个", element.selector, count);
        }

        Ok((element, answer, title))
    }
}

#[async_trait]
impl AiAgent for LlmAgent {
    async fn resolve_locator(
        &self,
        driver: &dyn BrowserDriver,
        instruction: &str,
    ) -> Result<ResolvedLocator, AgentError> {
        let start = Instant::now();
        let (element, answer, page_title) = self
            .ask_for_element(driver, instruction, "找出指令所指的那个元素")
            .await?;

        Ok(ResolvedLocator {
            locator: element.selector,
            latency_ms: start.elapsed().as_millis() as u64,
            page_title,
            element_text: answer.element_text.or_else(|| {
                (!element.text.is_empty()).then(|| element.text.clone())
            }),
        })
    }

    async fn perform_instruction(
        &self,
        driver: &dyn BrowserDriver,
        instruction: &str,
        action: ActionKind,
        value: Option<&str>,
    ) -> PerformOutcome {
        let start = Instant::now();
        let elapsed = || start.elapsed().as_millis() as u64;

        let mut step = Step::new(action).with_instruction(instruction);
        let locator = if action.needs_target() {
            let task = format!("找出完成 \"{}\" 动作需要操作的元素，并给出需要使用的值", action);
            match self.ask_for_element(driver, instruction, &task).await {
                Ok((element, answer, _)) => {
                    if let Some(v) = value.map(str::to_string).or(answer.value) {
                        step = step.with_value(v);
                    }
                    Some(element.selector)
                }
                Err(e) => {
                    warn!("委托执行失败，无法确定目标元素: {}", e);
                    return PerformOutcome::failed(elapsed(), e.to_string());
                }
            }
        } else {
            if let Some(v) = value {
                step = step.with_value(v);
            }
            None
        };

        if action == ActionKind::UploadFile {
            if let Some(path) = step.value.clone() {
                step = step.with_file_path(path);
            }
        }

        match self
            .runner
            .run(driver, &step, locator.as_deref(), self.action_timeout)
            .await
        {
            Ok(()) => PerformOutcome::succeeded(elapsed()),
            Err(e) => PerformOutcome::failed(elapsed(), e.to_string()),
        }
    }
}

fn pick_element(elements: &[ElementSnapshot], answer: &AgentAnswer) -> Option<ElementSnapshot> {
    if let Some(selector) = answer.selector.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        return Some(
            elements
                .iter()
                .find(|e| e.selector == selector)
                .cloned()
                .unwrap_or_else(|| ElementSnapshot {
                    selector: selector.to_string(),
                    ..Default::default()
                }),
        );
    }
    answer.index.and_then(|i| elements.get(i).cloned())
}

/// 构建定位请求，返回 (user_message, system_message)
fn build_messages(
    url: &str,
    title: Option<&str>,
    elements: &[ElementSnapshot],
    instruction: &str,
    task: &str,
) -> (String, String) {
    let system_message = "你是一个网页自动化助手，擅长根据自然语言描述在页面元素列表中找到目标元素。\
                          只能从给出的元素列表中选择，不能编造选择器。"
        .to_string();

    let candidates: Vec<serde_json::Value> = elements
        .iter()
        .enumerate()
        .map(|(idx, e)| {
            serde_json::json!({
                "index": idx,
                "selector": &e.selector,
                "tag": &e.tag,
                "text": crate::utils::truncate_text(&e.text, 80),
                "role": &e.role,
                "type": &e.input_type,
                "name": &e.name,
                "placeholder": &e.placeholder,
                "aria_label": &e.aria_label,
            })
        })
        .collect();
    let candidates_json = serde_json::to_string(&candidates).unwrap_or_default();

    let user_message = format!(
        r#"页面地址：{}
页面标题：{}

任务：{}
指令：{}

可交互元素列表（JSON）：
{}

只返回一个 JSON 对象，不要返回其他内容：
{{"index": <元素序号>, "selector": "<该元素的 selector 原样复制>", "element_text": "<元素文字>", "value": "<需要填写或选择的值，没有则为 null>"}}
如果列表中没有符合指令的元素，返回 {{"index": null, "selector": null}}。"#,
        url,
        title.unwrap_or("无"),
        task,
        instruction,
        candidates_json
    );

    (user_message, system_message)
}
