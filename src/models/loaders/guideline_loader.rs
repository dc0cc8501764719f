//! 讲解指南加载器
//!
//! 指南是一份可选的 TOML 文件，内容会在启用指南开关时拼进生成
//! 服务的系统提示词。文件不存在不算错误。

use crate::error::{ConfigError, PipelineResult};
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, serde::Deserialize)]
struct GuidelineFile {
    #[serde(default)]
    guidelines: Vec<GuidelineEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct GuidelineEntry {
    #[serde(default)]
    subject: Option<String>,
    text: String,
}

/// 从 TOML 文件加载讲解指南，拼接为一段提示词文本
pub async fn load_guidelines(path: &str) -> PipelineResult<Option<String>> {
    if !Path::new(path).exists() {
        debug!("讲解指南文件不存在，跳过: {}", path);
        return Ok(None);
    }

    let content = fs::read_to_string(path).await.map_err(|e| {
        ConfigError::GuidelineLoadFailed {
            path: path.to_string(),
            source: Box::new(e),
        }
    })?;

    let parsed: GuidelineFile =
        toml::from_str(&content).map_err(|e| ConfigError::GuidelineLoadFailed {
            path: path.to_string(),
            source: Box::new(e),
        })?;

    if parsed.guidelines.is_empty() {
        debug!("讲解指南文件为空: {}", path);
        return Ok(None);
    }

    info!("✓ 加载了 {} 条讲解指南", parsed.guidelines.len());

    let joined = parsed
        .guidelines
        .iter()
        .enumerate()
        .map(|(i, entry)| match &entry.subject {
            Some(subject) => format!("{}. [{}] {}", i + 1, subject, entry.text),
            None => format!("{}. {}", i + 1, entry.text),
        })
        .collect::<Vec<_>>()
        .join("\n");

    Ok(Some(joined))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_is_not_an_error() {
        let result = load_guidelines("definitely_missing_guidelines.toml").await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_load_and_join_entries() {
        let dir = std::env::temp_dir().join("paper_explain_guideline_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("guidelines.toml");
        std::fs::write(
            &path,
            r#"
[[guidelines]]
subject = "数学"
text = "先给出思路，再分步推导"

[[guidelines]]
text = "讲解使用中文"
"#,
        )
        .unwrap();

        let joined = load_guidelines(path.to_str().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(joined.contains("[数学]"));
        assert!(joined.contains("2. 讲解使用中文"));
    }
}
