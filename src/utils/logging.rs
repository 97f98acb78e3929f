use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::services::TierSummary;

/// 初始化 tracing 订阅器
///
/// 优先使用 `RUST_LOG`；未设置时 verbose 模式为 debug，否则为 info。
/// 重复调用是安全的（测试中会多次调用）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n步骤执行日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 分层步骤执行模式");
    info!("📊 最大并发运行数: {}", config.max_concurrent_runs);
    info!("🪜 默认降级策略: {}", config.fallback_strategy);
    info!("⏱️ 单层超时: {}ms", config.tier_timeout_ms);
    info!("{}", "=".repeat(60));
}

/// 记录运行定义加载信息
pub fn log_runs_loaded(total: usize, max_concurrent: usize) {
    info!("✓ 找到 {} 个待执行的运行", total);
    info!("📋 最多同时执行 {} 个，其余按优先级排队\n", max_concurrent);
}

/// 打印最终统计信息
///
/// # 参数
/// - `passed`: 通过数量
/// - `failed`: 失败 / 取消 / 崩溃数量
/// - `summary`: 层级统计
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(passed: usize, failed: usize, summary: &TierSummary, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部运行完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 通过: {}/{}", passed, passed + failed);
    info!("❌ 失败: {}", failed);
    info!("{}", "─".repeat(60));
    info!("🧮 步骤总数: {}", summary.steps);
    for tier in &summary.tiers {
        info!(
            "   {}: 尝试 {} 次, 作为最终层成功 {} 次, 平均耗时 {}ms",
            tier.tier,
            tier.attempts,
            tier.final_successes,
            tier.average_latency_ms()
        );
    }
    info!("   全部层级耗尽: {}", summary.exhausted);
    info!(
        "   缓存命中: {} / 未命中: {}",
        summary.cache_hits, summary.cache_misses
    );
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("一二三四五", 3), "一二三...");
    }
}
