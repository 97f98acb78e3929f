//! JS 执行器 - 基础设施层
//!
//! 持有 page 资源，只暴露"执行 JS"的能力

use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::DriverError;

/// JS 执行器
///
/// 职责：
/// - 持有 Page 资源
/// - 暴露 eval() 能力
/// - 不认识 Step / Run
/// - 不处理层级降级
#[derive(Clone)]
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 获取 page 的引用（用于其他操作）
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// 执行 JS 代码并返回 JSON 结果
    ///
    /// # 参数
    /// - `js_code`: 要执行的 JavaScript 表达式
    ///
    /// # 返回
    /// 返回 JSON 值；表达式结果为 undefined 时返回 Null
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue, DriverError> {
        let result = self
            .page
            .evaluate(js_code.into())
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(JsonValue::Null))
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T, DriverError> {
        let json_value = self.eval(js_code).await?;
        serde_json::from_value(json_value).map_err(|e| DriverError::Script(e.to_string()))
    }

    /// 执行返回布尔值的 JS 表达式；非布尔结果视为 false
    pub async fn eval_bool(&self, js_code: impl Into<String>) -> Result<bool, DriverError> {
        Ok(self.eval(js_code).await?.as_bool().unwrap_or(false))
    }
}
