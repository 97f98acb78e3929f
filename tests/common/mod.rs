//! 集成测试共用的假实现：浏览器驱动、AI 协作方、会话工厂

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tiered_step_runner::browser::SessionFactory;
use tiered_step_runner::config::Config;
use tiered_step_runner::error::{AgentError, DriverError};
use tiered_step_runner::infrastructure::driver::poll_until;
use tiered_step_runner::infrastructure::{BrowserDriver, ElementSnapshot};
use tiered_step_runner::models::{ActionKind, RunId};
use tiered_step_runner::services::{AiAgent, PerformOutcome, ResolvedLocator};

pub const PAGE_URL: &str = "https://shop.example.com/checkout";

/// 测试用配置：去掉所有等待
pub fn test_config() -> Config {
    Config {
        settle_delay_ms: 0,
        nav_min_delay_ms: 0,
        nav_post_delay_ms: 0,
        tier_timeout_ms: 2_000,
        dispatch_poll_interval_ms: 20,
        dispatcher_join_timeout_ms: 1_000,
        analytics_file: String::new(),
        cache_snapshot_file: String::new(),
        ..Config::default()
    }
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    pub text: String,
    pub visible: bool,
    pub file_input: bool,
}

/// 内存中的"页面"
pub struct FakeDriver {
    url: Mutex<String>,
    elements: Mutex<HashMap<String, FakeElement>>,
    actions: Mutex<Vec<String>>,
    click_delay: Mutex<Option<Duration>>,
    poll_interval: Mutex<Option<Duration>>,
    url_delay: Mutex<Option<Duration>>,
    closed: Mutex<bool>,
}

impl FakeDriver {
    pub fn new(url: &str) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            elements: Mutex::new(HashMap::new()),
            actions: Mutex::new(Vec::new()),
            click_delay: Mutex::new(None),
            poll_interval: Mutex::new(None),
            url_delay: Mutex::new(None),
            closed: Mutex::new(false),
        }
    }

    pub fn with_element(self, locator: &str, text: &str) -> Self {
        self.add_element(locator, text);
        self
    }

    pub fn add_element(&self, locator: &str, text: &str) {
        self.elements.lock().insert(
            locator.to_string(),
            FakeElement {
                text: text.to_string(),
                visible: true,
                file_input: false,
            },
        );
    }

    pub fn add_file_input(&self, locator: &str) {
        self.elements.lock().insert(
            locator.to_string(),
            FakeElement {
                text: String::new(),
                visible: false,
                file_input: true,
            },
        );
    }

    pub fn remove_element(&self, locator: &str) {
        self.elements.lock().remove(locator);
    }

    pub fn set_click_delay(&self, delay: Duration) {
        *self.click_delay.lock() = Some(delay);
    }

    /// 像真实驱动一样轮询等待元素出现，直到用完给定的超时
    pub fn set_polling(&self, interval: Duration) {
        *self.poll_interval.lock() = Some(interval);
    }

    pub fn set_url_delay(&self, delay: Duration) {
        *self.url_delay.lock() = Some(delay);
    }

    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    fn log(&self, action: String) {
        self.actions.lock().push(action);
    }

    fn element(&self, locator: &str) -> Result<FakeElement, DriverError> {
        self.elements
            .lock()
            .get(locator)
            .cloned()
            .ok_or_else(|| DriverError::ElementNotFound(locator.to_string()))
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), DriverError> {
        *self.url.lock() = url.to_string();
        self.log(format!("navigate {}", url));
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let delay = *self.url_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.url.lock().clone())
    }

    async fn title(&self) -> Result<Option<String>, DriverError> {
        Ok(Some("Fake Page".to_string()))
    }

    async fn wait_visible(&self, locator: &str, timeout: Duration) -> Result<(), DriverError> {
        let interval = *self.poll_interval.lock();
        if let Some(interval) = interval {
            let this = self;
            return poll_until(&format!("wait_visible {}", locator), timeout, interval, move || async move {
                Ok(this.element(locator).map(|e| e.visible).unwrap_or(false))
            })
            .await;
        }
        match self.element(locator)? {
            e if e.visible => Ok(()),
            _ => Err(DriverError::ElementNotFound(format!("{} 不可见", locator))),
        }
    }

    async fn is_visible(&self, locator: &str) -> Result<bool, DriverError> {
        Ok(self.element(locator).map(|e| e.visible).unwrap_or(false))
    }

    async fn wait_hidden(&self, _locator: &str, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    async fn element_count(&self, locator: &str) -> Result<usize, DriverError> {
        Ok(usize::from(self.elements.lock().contains_key(locator)))
    }

    async fn click(&self, locator: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.element(locator)?;
        let delay = *self.click_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.log(format!("click {}", locator));
        Ok(())
    }

    async fn fill(&self, locator: &str, value: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.element(locator)?;
        self.log(format!("fill {} {}", locator, value));
        Ok(())
    }

    async fn select_option(&self, locator: &str, value: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.element(locator)?;
        self.log(format!("select {} {}", locator, value));
        Ok(())
    }

    async fn set_checked(&self, locator: &str, checked: bool, _timeout: Duration) -> Result<(), DriverError> {
        self.element(locator)?;
        self.log(format!("checked {} {}", locator, checked));
        Ok(())
    }

    async fn hover(&self, locator: &str, _timeout: Duration) -> Result<(), DriverError> {
        self.element(locator)?;
        self.log(format!("hover {}", locator));
        Ok(())
    }

    async fn read_text(&self, locator: &str, _timeout: Duration) -> Result<String, DriverError> {
        Ok(self.element(locator)?.text)
    }

    async fn is_file_input(&self, locator: &str) -> Result<bool, DriverError> {
        Ok(self.element(locator)?.file_input)
    }

    async fn set_input_files(&self, locator: &str, files: &[PathBuf], _timeout: Duration) -> Result<(), DriverError> {
        self.element(locator)?;
        self.log(format!("upload {} {}", locator, files.len()));
        Ok(())
    }

    async fn wait_network_idle(&self, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    async fn wait_dom_ready(&self, _timeout: Duration) -> Result<(), DriverError> {
        Ok(())
    }

    async fn snapshot(&self, limit: usize) -> Result<Vec<ElementSnapshot>, DriverError> {
        Ok(self
            .elements
            .lock()
            .iter()
            .take(limit)
            .map(|(selector, e)| ElementSnapshot {
                selector: selector.clone(),
                tag: "button".to_string(),
                text: e.text.clone(),
                ..Default::default()
            })
            .collect())
    }

    async fn close(&self) -> Result<(), DriverError> {
        *self.closed.lock() = true;
        Ok(())
    }
}

/// 按指令查表的 AI 协作方
#[derive(Default)]
pub struct FakeAgent {
    resolutions: Mutex<HashMap<String, String>>,
    perform_succeeds: Mutex<bool>,
    resolve_calls: AtomicUsize,
    perform_calls: AtomicUsize,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolving(self, instruction: &str, locator: &str) -> Self {
        self.resolutions
            .lock()
            .insert(instruction.to_string(), locator.to_string());
        self
    }

    pub fn performing(self, succeeds: bool) -> Self {
        *self.perform_succeeds.lock() = succeeds;
        self
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn perform_calls(&self) -> usize {
        self.perform_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AiAgent for FakeAgent {
    async fn resolve_locator(
        &self,
        _driver: &dyn BrowserDriver,
        instruction: &str,
    ) -> Result<ResolvedLocator, AgentError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let locator = self
            .resolutions
            .lock()
            .get(instruction)
            .cloned()
            .ok_or_else(|| AgentError::NoMatch(instruction.to_string()))?;
        Ok(ResolvedLocator {
            locator,
            latency_ms: 5,
            page_title: Some("Fake Page".to_string()),
            element_text: None,
        })
    }

    async fn perform_instruction(
        &self,
        _driver: &dyn BrowserDriver,
        instruction: &str,
        _action: ActionKind,
        _value: Option<&str>,
    ) -> PerformOutcome {
        self.perform_calls.fetch_add(1, Ordering::SeqCst);
        if *self.perform_succeeds.lock() {
            PerformOutcome::succeeded(7)
        } else {
            PerformOutcome::failed(7, format!("无法完成: {}", instruction))
        }
    }
}

/// 每个运行都返回一个全新的假页面
pub struct FakeSessionFactory {
    template: Vec<(String, String)>,
    opened: Mutex<Vec<Arc<FakeDriver>>>,
    fail: bool,
}

impl FakeSessionFactory {
    pub fn new(elements: &[(&str, &str)]) -> Self {
        Self {
            template: elements
                .iter()
                .map(|(l, t)| (l.to_string(), t.to_string()))
                .collect(),
            opened: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            template: Vec::new(),
            opened: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn opened(&self) -> Vec<Arc<FakeDriver>> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn open_session(&self, _run_id: RunId) -> anyhow::Result<Arc<dyn BrowserDriver>> {
        if self.fail {
            anyhow::bail!("浏览器不可用");
        }
        let driver = Arc::new(FakeDriver::new(PAGE_URL));
        for (locator, text) in &self.template {
            driver.add_element(locator, text);
        }
        self.opened.lock().push(driver.clone());
        Ok(driver)
    }
}
