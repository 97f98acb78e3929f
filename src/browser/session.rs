//! 会话工厂：为每个被准入的运行打开独立的浏览器会话

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::browser::{connect_to_browser_and_page, launch_headless_browser};
use crate::config::{BrowserMode, Config};
use crate::infrastructure::{BrowserDriver, ChromiumDriver};
use crate::models::RunId;

/// 会话工厂
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open_session(&self, run_id: RunId) -> Result<Arc<dyn BrowserDriver>>;
}

/// 基于 chromiumoxide 的会话工厂
pub struct ChromiumSessionFactory {
    mode: BrowserMode,
    debug_port: u16,
    chrome_executable: Option<String>,
}

impl ChromiumSessionFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            mode: config.browser_mode,
            debug_port: config.browser_debug_port,
            chrome_executable: config.chrome_executable.clone(),
        }
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn open_session(&self, run_id: RunId) -> Result<Arc<dyn BrowserDriver>> {
        let driver = match self.mode {
            BrowserMode::Connect => {
                // 连接模式：浏览器属于外部进程，会话结束只关闭自己的页面
                let (_browser, page) = connect_to_browser_and_page(self.debug_port, None)
                    .await
                    .with_context(|| format!("[运行 {}] 无法连接浏览器", run_id.short()))?;
                ChromiumDriver::new(page, None)
            }
            BrowserMode::Headless => {
                let (browser, page) = launch_headless_browser(self.chrome_executable.as_deref())
                    .await
                    .with_context(|| format!("[运行 {}] 无法启动无头浏览器", run_id.short()))?;
                ChromiumDriver::new(page, Some(browser))
            }
        };
        info!("[运行 {}] 🌐 浏览器会话已打开 ({:?})", run_id.short(), self.mode);
        Ok(Arc::new(driver))
    }
}
