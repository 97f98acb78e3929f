use crate::models::run::RunDefinition;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从 TOML 文件加载运行定义
pub async fn load_run_definition(toml_file_path: &Path) -> Result<RunDefinition> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut run: RunDefinition = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    for (index, step) in run.steps.iter().enumerate() {
        step.validate()
            .with_context(|| format!("{} 第 {} 步不合法", toml_file_path.display(), index + 1))?;
    }

    run.file_path = Some(toml_file_path.to_string_lossy().to_string());

    Ok(run)
}

/// 从文件夹中加载所有 TOML 运行定义（按文件名排序）
///
/// 单个文件解析失败只记录警告，不影响其他文件。
pub async fn load_all_run_files(folder_path: &str) -> Result<Vec<RunDefinition>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut runs = Vec::new();
    for path in paths {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_run_definition(&path).await {
            Ok(run) => {
                tracing::info!("成功加载 {} 个步骤", run.steps.len());
                runs.push(run);
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(runs)
}
