pub mod chromium_driver;
pub mod driver;
pub mod js_executor;

pub use chromium_driver::ChromiumDriver;
pub use driver::{BrowserDriver, ElementSnapshot, Selector};
pub use js_executor::JsExecutor;
