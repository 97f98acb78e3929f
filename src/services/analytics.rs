//! 分析记录写入服务 - 业务能力层
//!
//! 只负责"把步骤分析记录写出去"能力，不关心流程

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::models::StepAnalyticsRecord;

/// 分析记录接收方
///
/// 写入失败只会被记录为警告，不会影响步骤结果。
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn record(&self, record: &StepAnalyticsRecord) -> Result<()>;
}

/// JSON Lines 分析记录写入器
///
/// 每个运行持有自己的写入器实例；每条记录一次追加写入一整行。
pub struct JsonlAnalyticsWriter {
    file_path: PathBuf,
}

impl JsonlAnalyticsWriter {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

#[async_trait]
impl AnalyticsSink for JsonlAnalyticsWriter {
    async fn record(&self, record: &StepAnalyticsRecord) -> Result<()> {
        debug!(
            "写入分析记录: 运行 {} | 步骤 {} | 成功: {}",
            record.run_id.short(),
            record.step_index,
            record.success
        );

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .await
            .with_context(|| format!("无法打开分析文件: {}", self.file_path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}
