//! 浏览器驱动接口 - 基础设施层
//!
//! 确定性执行路径（Tier-1/Tier-2）和 AI 协作方共用同一个驱动句柄

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::DriverError;

/// 页面上可交互元素的精简描述，供 AI 协作方挑选
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementSnapshot {
    pub selector: String,
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
}

/// 确定性浏览器驱动
///
/// 所有会等待的操作都接收超时时间；超时统一返回 `DriverError::Timeout`。
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// 导航到指定 URL
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), DriverError>;

    /// 当前页面 URL
    async fn current_url(&self) -> Result<String, DriverError>;

    /// 当前页面标题
    async fn title(&self) -> Result<Option<String>, DriverError>;

    /// 等待元素出现且可见
    async fn wait_visible(&self, locator: &str, timeout: Duration) -> Result<(), DriverError>;

    /// 元素当前是否可见（不等待）
    async fn is_visible(&self, locator: &str) -> Result<bool, DriverError>;

    /// 等待元素消失或不可见
    async fn wait_hidden(&self, locator: &str, timeout: Duration) -> Result<(), DriverError>;

    /// 匹配定位器的元素数量
    async fn element_count(&self, locator: &str) -> Result<usize, DriverError>;

    async fn click(&self, locator: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn fill(&self, locator: &str, value: &str, timeout: Duration) -> Result<(), DriverError>;

    /// 按 value 或可见文本选择下拉选项
    async fn select_option(&self, locator: &str, value: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn set_checked(&self, locator: &str, checked: bool, timeout: Duration) -> Result<(), DriverError>;

    async fn hover(&self, locator: &str, timeout: Duration) -> Result<(), DriverError>;

    /// 读取元素可见文本（输入框读取 value）
    async fn read_text(&self, locator: &str, timeout: Duration) -> Result<String, DriverError>;

    /// 元素是否为 `input[type=file]`
    async fn is_file_input(&self, locator: &str) -> Result<bool, DriverError>;

    async fn set_input_files(&self, locator: &str, files: &[PathBuf], timeout: Duration) -> Result<(), DriverError>;

    /// 等待网络空闲
    async fn wait_network_idle(&self, timeout: Duration) -> Result<(), DriverError>;

    /// 等待 DOM 就绪（readyState 不再是 loading）
    async fn wait_dom_ready(&self, timeout: Duration) -> Result<(), DriverError>;

    /// 采集可交互元素快照
    async fn snapshot(&self, limit: usize) -> Result<Vec<ElementSnapshot>, DriverError>;

    /// 关闭会话
    async fn close(&self) -> Result<(), DriverError>;
}

/// 解析后的定位器
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    /// 解析定位器语法
    ///
    /// - `css=...` / 普通字符串 → CSS
    /// - `xpath=...` / 以 `//` 或 `(//` 开头 → XPath
    /// - `text=...` → 按可见文本精确匹配的 XPath
    pub fn parse(locator: &str) -> Result<Self, DriverError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(DriverError::InvalidLocator("定位器为空".to_string()));
        }

        if let Some(rest) = locator.strip_prefix("xpath=") {
            return Ok(Selector::XPath(rest.trim().to_string()));
        }
        if let Some(rest) = locator.strip_prefix("css=") {
            return Ok(Selector::Css(rest.trim().to_string()));
        }
        if let Some(rest) = locator.strip_prefix("text=") {
            let text = rest.trim().trim_matches('"');
            return Ok(Selector::XPath(format!(
                "//*[normalize-space(.)={}][not(*[normalize-space(.)={}])]",
                xpath_literal(text),
                xpath_literal(text)
            )));
        }
        if locator.starts_with("//") || locator.starts_with("(//") {
            return Ok(Selector::XPath(locator.to_string()));
        }
        Ok(Selector::Css(locator.to_string()))
    }

    /// 返回查找第一个匹配元素的 JS 表达式
    pub fn find_expr(&self) -> String {
        match self {
            Selector::Css(css) => format!("document.querySelector({})", js_string(css)),
            Selector::XPath(xpath) => format!(
                "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
                js_string(xpath)
            ),
        }
    }

    /// 返回统计匹配数量的 JS 表达式
    pub fn count_expr(&self) -> String {
        match self {
            Selector::Css(css) => format!("document.querySelectorAll({}).length", js_string(css)),
            Selector::XPath(xpath) => format!(
                "document.evaluate({}, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength",
                js_string(xpath)
            ),
        }
    }
}

/// JSON 字符串字面量同时也是合法的 JS 字符串字面量
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// 构造 XPath 字符串字面量，处理同时含有单双引号的情况
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{}'", text)
    } else if !text.contains('"') {
        format!("\"{}\"", text)
    } else {
        let parts: Vec<String> = text.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

/// 给异步操作加上超时
pub async fn with_timeout<T, F>(operation: &str, timeout: Duration, fut: F) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::timeout(operation, timeout.as_millis() as u64)),
    }
}

/// 轮询直到条件成立或超时
pub async fn poll_until<F, Fut>(
    operation: &str,
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<(), DriverError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, DriverError>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(DriverError::timeout(operation, timeout.as_millis() as u64));
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_css_and_xpath() {
        assert_eq!(Selector::parse("#login").unwrap(), Selector::Css("#login".into()));
        assert_eq!(Selector::parse("css=.btn").unwrap(), Selector::Css(".btn".into()));
        assert_eq!(
            Selector::parse("//button[1]").unwrap(),
            Selector::XPath("//button[1]".into())
        );
        assert_eq!(
            Selector::parse("xpath=//a").unwrap(),
            Selector::XPath("//a".into())
        );
        assert!(Selector::parse("  ").is_err());
    }

    #[test]
    fn test_text_locator_becomes_xpath() {
        match Selector::parse("text=Next").unwrap() {
            Selector::XPath(xpath) => assert!(xpath.contains("'Next'")),
            other => panic!("unexpected selector {:?}", other),
        }
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(xpath_literal("a'b\"c"), "concat('a', \"'\", 'b\"c')");
    }

    #[test]
    fn test_find_expr_escapes_quotes() {
        let expr = Selector::Css("input[name=\"q\"]".into()).find_expr();
        assert_eq!(expr, r#"document.querySelector("input[name=\"q\"]")"#);
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let result = poll_until("never", Duration::from_millis(30), Duration::from_millis(5), || async {
            Ok(false)
        })
        .await;
        assert!(matches!(result, Err(DriverError::Timeout { .. })));
    }
}
