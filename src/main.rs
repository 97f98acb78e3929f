use anyhow::Result;
use std::time::Duration;
use tracing::{error, info, warn};

use tiered_step_runner::config::Config;
use tiered_step_runner::models::load_all_run_files;
use tiered_step_runner::utils::logging;
use tiered_step_runner::App;

/// 等待所有运行结束的最长时间
const MAX_WAIT: Duration = Duration::from_secs(6 * 60 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logging::init(config.verbose_logging);
    config.validate()?;
    logging::init_log_file(&config.output_log_file)?;
    logging::log_startup(&config);

    let app = App::new(config.clone());
    app.load_cache_snapshot();

    // 加载并提交所有运行
    info!("\n📁 正在扫描待执行的运行...");
    let definitions = load_all_run_files(&config.runs_folder).await?;
    if definitions.is_empty() {
        warn!("⚠️ 没有找到待执行的TOML文件，程序结束");
        return Ok(());
    }
    logging::log_runs_loaded(definitions.len(), config.max_concurrent_runs);

    for definition in definitions {
        let name = definition.name.clone();
        match app.submit_definition(definition) {
            Ok(submission) => info!("📝 {} → 运行 {}", name, submission.run_id.short()),
            Err(e) => error!("❌ 提交 {} 失败: {}", name, e),
        }
    }

    // 执行
    app.start();
    if !app.wait_idle(MAX_WAIT).await {
        warn!("⚠️ 等待运行结束超时，仍在执行的运行将被放弃");
    }
    app.stop().await;

    // 输出最终统计
    let (passed, failed) = app.outcome_counts();
    logging::print_final_stats(passed, failed, &app.tier_summary(), &config.output_log_file);

    app.save_cache_snapshot();

    Ok(())
}
