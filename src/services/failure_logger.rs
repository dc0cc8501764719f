//! 失败记录服务 - 业务能力层
//!
//! 只负责"把生成失败的题目落盘"能力，不关心流程

use crate::models::Explanation;
use crate::utils::truncate_text;
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// 失败记录能力
///
/// 尽力而为：写入失败绝不中断流水线，只记诊断日志。
#[async_trait]
pub trait FailureLog: Send + Sync {
    async fn log_failure(&self, record: &Explanation, reason: &str);
}

/// 失败记录写入服务
///
/// 职责：
/// - 把生成失败的题目追加到失败记录文件
/// - 同时落一份题目裁剪图，便于事后排查
/// - 只处理单条记录，不出现 Vec<Explanation>
/// - 不关心流程顺序
pub struct FailureWriter {
    log_path: String,
    image_dir: String,
}

impl FailureWriter {
    /// 创建新的失败记录服务
    pub fn new() -> Self {
        Self {
            log_path: "failures.log".to_string(),
            image_dir: "failures".to_string(),
        }
    }

    /// 使用自定义路径创建
    pub fn with_paths(log_path: impl Into<String>, image_dir: impl Into<String>) -> Self {
        Self {
            log_path: log_path.into(),
            image_dir: image_dir.into(),
        }
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(line.as_bytes())
    }

    fn dump_image(&self, record: &Explanation) -> std::io::Result<()> {
        if record.problem_image.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.image_dir)?;
        let path = Path::new(&self.image_dir).join(format!("{}.png", record.id));
        std::fs::write(path, &record.problem_image)
    }
}

impl Default for FailureWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FailureLog for FailureWriter {
    async fn log_failure(&self, record: &Explanation, reason: &str) {
        debug!(
            "记录失败: 第 {} 页 题 {} | 原因长度: {}",
            record.page_number,
            record.problem_number,
            reason.len()
        );

        let line = format!(
            "[{}] 第{}页 题{} | 原因: {} | 题干: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.page_number,
            record.problem_number,
            truncate_text(reason, 200),
            truncate_text(&record.original_text, 120)
        );

        if let Err(e) = self.append_line(&line) {
            warn!("写入失败记录文件失败（忽略）: {}", e);
        }
        if let Err(e) = self.dump_image(record) {
            warn!("保存失败题目截图失败（忽略）: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failure_write_appends_line() {
        let dir = std::env::temp_dir().join("paper_explain_failure_test");
        std::fs::create_dir_all(&dir).unwrap();
        let log_path = dir.join("failures.log");
        let _ = std::fs::remove_file(&log_path);

        let writer = FailureWriter::with_paths(
            log_path.to_str().unwrap(),
            dir.join("imgs").to_str().unwrap(),
        );
        let record = Explanation::draft(3, 12, vec![], "解不等式 2x+1>5".to_string());
        writer.log_failure(&record, "服务拒答").await;

        let content = std::fs::read_to_string(&log_path).unwrap();
        assert!(content.contains("第3页 题12"));
        assert!(content.contains("服务拒答"));
    }

    #[tokio::test]
    async fn test_failure_write_never_panics_on_bad_path() {
        let writer = FailureWriter::with_paths("/nonexistent_dir/xx/failures.log", "/nonexistent_dir/xx");
        let record = Explanation::draft(1, 1, vec![1, 2], "题干".to_string());
        // 路径不可写时只能静默吞掉
        writer.log_failure(&record, "网络错误").await;
    }
}
