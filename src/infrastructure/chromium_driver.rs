//! 基于 chromiumoxide 的浏览器驱动
//!
//! 元素操作通过页面脚本完成（统一支持 CSS 与 XPath），
//! 文件上传走 CDP `DOM.setFileInputFiles`。

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::{Browser, Element, Page};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::DriverError;
use crate::infrastructure::driver::{
    js_string, poll_until, with_timeout, BrowserDriver, ElementSnapshot, Selector,
};
use crate::infrastructure::JsExecutor;

/// 网络请求数保持不变多久视为空闲
const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// 元素脚本的返回结构
#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

/// Chromium 驱动
///
/// 一个实例对应一个运行的独立会话（页面，无头模式下还包括整个浏览器进程）。
pub struct ChromiumDriver {
    js: JsExecutor,
    /// 无头模式下由本会话独占的浏览器
    owned_browser: Mutex<Option<Browser>>,
    poll_interval: Duration,
}

impl ChromiumDriver {
    /// 包装一个页面；`owned_browser` 为 Some 时关闭会话会一并关闭浏览器
    pub fn new(page: Page, owned_browser: Option<Browser>) -> Self {
        Self {
            js: JsExecutor::new(page),
            owned_browser: Mutex::new(owned_browser),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn executor(&self) -> &JsExecutor {
        &self.js
    }

    /// 对第一个匹配元素执行脚本片段，`body` 中可以使用变量 `el`
    async fn run_on_element(&self, locator: &str, body: &str) -> Result<ScriptOutcome, DriverError> {
        let selector = Selector::parse(locator)?;
        let script = format!(
            "(() => {{ const el = {}; if (!el) return {{ ok: false, error: 'not_found' }}; {} }})()",
            selector.find_expr(),
            body
        );
        let outcome: ScriptOutcome = self.js.eval_as(script).await?;
        match outcome.error.as_deref() {
            Some("not_found") if !outcome.ok => Err(DriverError::ElementNotFound(locator.to_string())),
            _ => Ok(outcome),
        }
    }

    /// 等待可见后执行元素脚本，失败时转为驱动错误
    async fn act(&self, operation: &str, locator: &str, body: &str, timeout: Duration) -> Result<ScriptOutcome, DriverError> {
        let label = format!("{} {}", operation, locator);
        with_timeout(&label, timeout, async {
            self.wait_visible(locator, timeout).await?;
            let outcome = self.run_on_element(locator, body).await?;
            if outcome.ok {
                Ok(outcome)
            } else {
                Err(DriverError::Script(format!(
                    "{}: {}",
                    label,
                    outcome.error.clone().unwrap_or_else(|| "未知错误".to_string())
                )))
            }
        })
        .await
    }

    async fn find_element(&self, locator: &str) -> Result<Element, DriverError> {
        let page = self.js.page();
        let found = match Selector::parse(locator)? {
            Selector::Css(css) => page.find_element(css).await,
            Selector::XPath(xpath) => page.find_xpath(xpath).await,
        };
        found.map_err(|_| DriverError::ElementNotFound(locator.to_string()))
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), DriverError> {
        debug!("导航到: {}", url);
        with_timeout(&format!("navigate {}", url), timeout, async {
            self.js
                .page()
                .goto(url)
                .await
                .map_err(|e| DriverError::NavigationFailed {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;
            Ok::<_, DriverError>(())
        })
        .await
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.js.page().url().await?.unwrap_or_default())
    }

    async fn title(&self) -> Result<Option<String>, DriverError> {
        Ok(self.js.page().get_title().await?)
    }

    async fn wait_visible(&self, locator: &str, timeout: Duration) -> Result<(), DriverError> {
        poll_until(&format!("wait_visible {}", locator), timeout, self.poll_interval, || {
            self.is_visible(locator)
        })
        .await
    }

    async fn is_visible(&self, locator: &str) -> Result<bool, DriverError> {
        let selector = Selector::parse(locator)?;
        let script = format!(
            r#"(() => {{
                const el = {};
                if (!el) return false;
                const rect = el.getBoundingClientRect();
                const style = window.getComputedStyle(el);
                return rect.width > 0 && rect.height > 0
                    && style.visibility !== 'hidden' && style.display !== 'none';
            }})()"#,
            selector.find_expr()
        );
        self.js.eval_bool(script).await
    }

    async fn wait_hidden(&self, locator: &str, timeout: Duration) -> Result<(), DriverError> {
        poll_until(&format!("wait_hidden {}", locator), timeout, self.poll_interval, || async {
            Ok::<_, DriverError>(!self.is_visible(locator).await?)
        })
        .await
    }

    async fn element_count(&self, locator: &str) -> Result<usize, DriverError> {
        let selector = Selector::parse(locator)?;
        let count = self.js.eval(selector.count_expr()).await?;
        Ok(count.as_u64().unwrap_or(0) as usize)
    }

    async fn click(&self, locator: &str, timeout: Duration) -> Result<(), DriverError> {
        self.act(
            "click",
            locator,
            "el.scrollIntoView({ block: 'center' }); el.click(); return { ok: true };",
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn fill(&self, locator: &str, value: &str, timeout: Duration) -> Result<(), DriverError> {
        let body = format!(
            r#"const value = {};
            el.focus();
            if (el.isContentEditable) {{
                el.textContent = value;
            }} else {{
                const desc = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value');
                if (desc && desc.set) {{ desc.set.call(el, value); }} else {{ el.value = value; }}
            }}
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return {{ ok: true }};"#,
            js_string(value)
        );
        self.act("fill", locator, &body, timeout).await?;
        Ok(())
    }

    async fn select_option(&self, locator: &str, value: &str, timeout: Duration) -> Result<(), DriverError> {
        let body = format!(
            r#"const wanted = {};
            if (el.tagName !== 'SELECT') return {{ ok: false, error: 'not a select element' }};
            const option = Array.from(el.options)
                .find(o => o.value === wanted || o.text.trim() === wanted);
            if (!option) return {{ ok: false, error: 'option not found: ' + wanted }};
            el.value = option.value;
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return {{ ok: true }};"#,
            js_string(value)
        );
        self.act("select", locator, &body, timeout).await?;
        Ok(())
    }

    async fn set_checked(&self, locator: &str, checked: bool, timeout: Duration) -> Result<(), DriverError> {
        let body = format!(
            r#"const wanted = {};
            if (el.checked !== wanted) el.click();
            return el.checked === wanted
                ? {{ ok: true }}
                : {{ ok: false, error: 'checked state did not change' }};"#,
            checked
        );
        self.act(if checked { "check" } else { "uncheck" }, locator, &body, timeout)
            .await?;
        Ok(())
    }

    async fn hover(&self, locator: &str, timeout: Duration) -> Result<(), DriverError> {
        self.act(
            "hover",
            locator,
            r#"el.scrollIntoView({ block: 'center' });
            for (const type of ['mouseover', 'mouseenter', 'mousemove']) {
                el.dispatchEvent(new MouseEvent(type, { bubbles: true }));
            }
            return { ok: true };"#,
            timeout,
        )
        .await?;
        Ok(())
    }

    async fn read_text(&self, locator: &str, timeout: Duration) -> Result<String, DriverError> {
        let outcome = self
            .act(
                "read_text",
                locator,
                r#"const isField = el.tagName === 'INPUT' || el.tagName === 'TEXTAREA';
                return { ok: true, text: isField ? el.value : (el.innerText || el.textContent || '') };"#,
                timeout,
            )
            .await?;
        Ok(outcome.text.unwrap_or_default())
    }

    async fn is_file_input(&self, locator: &str) -> Result<bool, DriverError> {
        let outcome = self
            .run_on_element(
                locator,
                "return { ok: el.tagName === 'INPUT' && (el.type || '').toLowerCase() === 'file' };",
            )
            .await?;
        Ok(outcome.ok)
    }

    async fn set_input_files(&self, locator: &str, files: &[PathBuf], timeout: Duration) -> Result<(), DriverError> {
        with_timeout(&format!("set_input_files {}", locator), timeout, async {
            let element = self.find_element(locator).await?;
            let params = SetFileInputFilesParams::builder()
                .files(files.iter().map(|p| p.to_string_lossy().to_string()))
                .backend_node_id(element.backend_node_id.clone())
                .build()
                .map_err(DriverError::Protocol)?;
            self.js.page().execute(params).await?;
            Ok::<_, DriverError>(())
        })
        .await
    }

    async fn wait_network_idle(&self, timeout: Duration) -> Result<(), DriverError> {
        let script = "({ state: document.readyState, resources: performance.getEntriesByType('resource').length })";

        #[derive(Deserialize)]
        struct Probe {
            state: String,
            resources: u64,
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut last_count: Option<u64> = None;
        let mut quiet_since = tokio::time::Instant::now();
        loop {
            let probe: Probe = self.js.eval_as(script).await?;
            let now = tokio::time::Instant::now();
            if last_count != Some(probe.resources) {
                last_count = Some(probe.resources);
                quiet_since = now;
            }
            if probe.state == "complete" && now.duration_since(quiet_since) >= NETWORK_QUIET_WINDOW {
                return Ok(());
            }
            if now >= deadline {
                return Err(DriverError::timeout("wait_network_idle", timeout.as_millis() as u64));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_dom_ready(&self, timeout: Duration) -> Result<(), DriverError> {
        poll_until("wait_dom_ready", timeout, self.poll_interval, || {
            self.js.eval_bool("document.readyState !== 'loading'")
        })
        .await
    }

    async fn snapshot(&self, limit: usize) -> Result<Vec<ElementSnapshot>, DriverError> {
        let script = format!(
            r#"(() => {{
                const limit = {limit};
                const cssEscape = (v) => (window.CSS && CSS.escape) ? CSS.escape(v) : v;
                const selectorFor = (el) => {{
                    if (el.id) return '#' + cssEscape(el.id);
                    const tag = el.tagName.toLowerCase();
                    for (const attr of ['data-testid', 'name', 'aria-label', 'placeholder']) {{
                        const v = el.getAttribute(attr);
                        if (v) return tag + '[' + attr + '=' + JSON.stringify(v) + ']';
                    }}
                    const parts = [];
                    let node = el;
                    while (node && node.nodeType === 1 && node !== document.body) {{
                        const parent = node.parentElement;
                        const name = node.tagName.toLowerCase();
                        if (!parent) {{ parts.unshift(name); break; }}
                        const same = Array.from(parent.children).filter(c => c.tagName === node.tagName);
                        parts.unshift(same.length > 1 ? name + ':nth-of-type(' + (same.indexOf(node) + 1) + ')' : name);
                        node = parent;
                    }}
                    return 'body > ' + parts.join(' > ');
                }};
                const visible = (el) => {{
                    const r = el.getBoundingClientRect();
                    const s = window.getComputedStyle(el);
                    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
                }};
                const query = 'a, button, input, select, textarea, label, [role=button], [role=link], [role=checkbox], [onclick], [contenteditable=true]';
                return Array.from(document.querySelectorAll(query))
                    .filter(el => visible(el) || (el.tagName === 'INPUT' && el.type === 'file'))
                    .slice(0, limit)
                    .map(el => ({{
                        selector: selectorFor(el),
                        tag: el.tagName.toLowerCase(),
                        text: (el.innerText || el.value || '').trim().slice(0, 80),
                        role: el.getAttribute('role') || undefined,
                        input_type: el.getAttribute('type') || undefined,
                        name: el.getAttribute('name') || undefined,
                        placeholder: el.getAttribute('placeholder') || undefined,
                        aria_label: el.getAttribute('aria-label') || undefined,
                    }}));
            }})()"#
        );
        self.js.eval_as(script).await
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.js.page().clone().close().await?;
        if let Some(mut browser) = self.owned_browser.lock().await.take() {
            browser.close().await?;
            let _ = browser.wait().await;
        }
        Ok(())
    }
}
