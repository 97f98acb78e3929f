//! 确定性动作执行逻辑
//!
//! Tier-1、Tier-2 以及 AI 协作方委托执行时共用同一套动作语义，
//! 区别只在于定位器从哪里来。

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{TierError, TierErrorKind};
use crate::infrastructure::BrowserDriver;
use crate::models::{ActionKind, Step};

/// 点击后可能触发页面跳转的按钮文字
///
/// 英文按整词匹配（不区分大小写）；中文没有词边界，按子串匹配。
static NAVIGATION_INTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:next|continue|submit|confirm|upload|proceed)\b|下一步|继续|提交|确认|上传")
        .expect("跳转意图正则无效")
});

/// 常见的加载中指示器
const LOADING_INDICATORS: &[&str] = &[
    ".loading",
    ".spinner",
    ".ant-spin-spinning",
    ".el-loading-mask",
    "[aria-busy=\"true\"]",
    "[role=\"progressbar\"]",
];

/// 按钮文字是否带有跳转意图
pub fn has_navigation_intent(text: &str) -> bool {
    NAVIGATION_INTENT_RE.is_match(text)
}

/// 动作执行器
#[derive(Debug, Clone)]
pub struct ActionRunner {
    settle_delay: Duration,
    nav_min_delay: Duration,
    nav_post_delay: Duration,
}

impl ActionRunner {
    pub fn new(config: &Config) -> Self {
        Self::with_delays(
            Duration::from_millis(config.settle_delay_ms),
            Duration::from_millis(config.nav_min_delay_ms),
            Duration::from_millis(config.nav_post_delay_ms),
        )
    }

    pub fn with_delays(settle_delay: Duration, nav_min_delay: Duration, nav_post_delay: Duration) -> Self {
        Self {
            settle_delay,
            nav_min_delay,
            nav_post_delay,
        }
    }

    /// 执行一个步骤
    ///
    /// `locator` 为已确定的目标定位器；需要目标的动作缺少定位器时返回 `NoLocatorProvided`。
    pub async fn run(
        &self,
        driver: &dyn BrowserDriver,
        step: &Step,
        locator: Option<&str>,
        timeout: Duration,
    ) -> Result<(), TierError> {
        match step.action {
            ActionKind::Navigate => {
                let url = step
                    .value
                    .as_deref()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| TierError::execution_failed("navigate 缺少目标 URL"))?;
                self.navigate(driver, url, timeout).await
            }
            ActionKind::Wait => self.wait(driver, step.wait_ms(), locator, timeout).await,
            action => {
                let locator = locator.ok_or_else(TierError::no_locator)?;
                self.act_on(driver, action, locator, step, timeout).await
            }
        }
    }

    /// 导航并等待页面稳定
    pub async fn navigate(&self, driver: &dyn BrowserDriver, url: &str, timeout: Duration) -> Result<(), TierError> {
        debug!("导航到: {}", url);
        driver.navigate(url, timeout).await?;
        if let Err(e) = driver.wait_network_idle(timeout).await {
            debug!("等待网络空闲失败，改为等待 DOM 就绪: {}", e);
            driver.wait_dom_ready(timeout).await?;
        }
        Ok(())
    }

    async fn wait(
        &self,
        driver: &dyn BrowserDriver,
        wait_ms: Option<u64>,
        locator: Option<&str>,
        timeout: Duration,
    ) -> Result<(), TierError> {
        if let Some(ms) = wait_ms {
            sleep(Duration::from_millis(ms)).await;
            return Ok(());
        }
        match locator {
            Some(locator) => Ok(driver.wait_visible(locator, timeout).await?),
            None => Err(TierError::execution_failed(
                "wait 需要毫秒数或目标元素",
            )),
        }
    }

    async fn act_on(
        &self,
        driver: &dyn BrowserDriver,
        action: ActionKind,
        locator: &str,
        step: &Step,
        timeout: Duration,
    ) -> Result<(), TierError> {
        match action {
            ActionKind::Click => {
                driver.wait_visible(locator, timeout).await?;
                let text = driver.read_text(locator, timeout).await.unwrap_or_default();
                driver.click(locator, timeout).await?;
                if has_navigation_intent(&text) {
                    debug!("点击 \"{}\" 可能触发跳转，等待页面稳定", text.trim());
                    self.stabilize_after_navigation(driver, timeout).await;
                } else {
                    self.settle().await;
                }
            }
            ActionKind::Fill => {
                let value = step.value.as_deref().unwrap_or_default();
                driver.fill(locator, value, timeout).await?;
                self.settle().await;
            }
            ActionKind::Select => {
                let value = step
                    .value
                    .as_deref()
                    .ok_or_else(|| TierError::execution_failed("select 缺少选项值"))?;
                driver.select_option(locator, value, timeout).await?;
                self.settle().await;
            }
            ActionKind::Check | ActionKind::Uncheck => {
                driver
                    .set_checked(locator, action == ActionKind::Check, timeout)
                    .await?;
                self.settle().await;
            }
            ActionKind::Hover => {
                driver.hover(locator, timeout).await?;
                self.settle().await;
            }
            ActionKind::Assert => {
                driver.wait_visible(locator, timeout).await?;
                if let Some(expected) = step.value.as_deref() {
                    let actual = driver.read_text(locator, timeout).await?;
                    if !actual.contains(expected) {
                        return Err(TierError::execution_failed(format!(
                            "断言失败: 期望包含 \"{}\"，实际为 \"{}\"",
                            expected,
                            actual.trim()
                        )));
                    }
                }
            }
            ActionKind::UploadFile => self.upload(driver, locator, step, timeout).await?,
            ActionKind::Navigate | ActionKind::Wait => {
                return Err(TierError::execution_failed(format!("{} 不作用于元素", action)));
            }
        }
        Ok(())
    }

    async fn upload(
        &self,
        driver: &dyn BrowserDriver,
        locator: &str,
        step: &Step,
        timeout: Duration,
    ) -> Result<(), TierError> {
        let file_path = step
            .file_path
            .as_deref()
            .ok_or_else(|| TierError::new(TierErrorKind::FileNotFound, "upload_file 缺少文件路径"))?;
        let path = Path::new(file_path);
        if !path.is_file() {
            return Err(TierError::new(
                TierErrorKind::FileNotFound,
                format!("文件不存在: {}", file_path),
            ));
        }

        match driver.is_file_input(locator).await {
            Ok(true) => {}
            Ok(false) => warn!("目标元素不是 input[type=file]，仍尝试上传: {}", locator),
            Err(e) => warn!("无法确认目标元素类型，仍尝试上传: {} ({})", locator, e),
        }

        driver
            .set_input_files(locator, &[PathBuf::from(path)], timeout)
            .await?;
        self.settle().await;
        Ok(())
    }

    /// 跳转后的扩展稳定等待
    ///
    /// 网络空闲 → 失败则 DOM 就绪 → 固定最小延迟 → 等待可见的加载指示器消失 → 再延迟一次。
    /// 这里的任何失败都不会让动作失败。
    async fn stabilize_after_navigation(&self, driver: &dyn BrowserDriver, timeout: Duration) {
        if let Err(e) = driver.wait_network_idle(timeout).await {
            debug!("等待网络空闲失败: {}", e);
            if let Err(e) = driver.wait_dom_ready(timeout).await {
                debug!("等待 DOM 就绪失败: {}", e);
            }
        }
        sleep(self.nav_min_delay).await;

        for indicator in LOADING_INDICATORS {
            if matches!(driver.is_visible(indicator).await, Ok(true)) {
                debug!("等待加载指示器消失: {}", indicator);
                if let Err(e) = driver.wait_hidden(indicator, timeout).await {
                    debug!("加载指示器未消失: {} ({})", indicator, e);
                }
            }
        }
        sleep(self.nav_post_delay).await;
    }

    async fn settle(&self) {
        sleep(self.settle_delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation_intent_is_case_insensitive() {
        assert!(has_navigation_intent("Next"));
        assert!(has_navigation_intent("  SUBMIT order "));
        assert!(has_navigation_intent("Proceed to checkout"));
        assert!(has_navigation_intent("下一步"));
        assert!(!has_navigation_intent("Add to cart"));
        assert!(!has_navigation_intent(""));
    }

    #[test]
    fn test_navigation_intent_matches_whole_words_only() {
        assert!(!has_navigation_intent("Context menu"));
        assert!(!has_navigation_intent("Nextcloud login"));
        assert!(!has_navigation_intent("Unconfirmed orders"));
        assert!(!has_navigation_intent("Uploads"));
        assert!(has_navigation_intent("Next →"));
        assert!(has_navigation_intent("Save & Continue"));
        assert!(has_navigation_intent("点击提交"));
    }
}
