//! 进度回调契约
//!
//! 流水线各阶段通过这个接口向外推送状态，推送即忘。不同记录
//! 之间的更新顺序不做保证，但同一条记录的更新必须按流水线发出
//! 的顺序送达（加载中 → 终态），否则终态会被过期的加载状态覆盖。

use crate::models::Explanation;
use tracing::{debug, info};

/// 进度接收端
///
/// 实现必须是 `Send + Sync`，两个推送都不允许阻塞流水线。
pub trait ProgressSink: Send + Sync {
    /// 推送一条人类可读的状态消息
    fn push_status(&self, message: &str);

    /// 推送单条讲解记录的整体替换
    fn push_update(&self, record: &Explanation);
}

/// 把进度写进 tracing 日志的默认实现
pub struct TracingProgressSink {
    verbose: bool,
}

impl TracingProgressSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Default for TracingProgressSink {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ProgressSink for TracingProgressSink {
    fn push_status(&self, message: &str) {
        info!("{}", message);
    }

    fn push_update(&self, record: &Explanation) {
        if self.verbose {
            info!(
                "讲解 {} 更新: loading={} error={} golden={}",
                record.id, record.is_loading, record.is_error, record.is_golden
            );
        } else {
            debug!("讲解 {} 更新", record.id);
        }
    }
}
