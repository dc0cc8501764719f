//! 生成调度器 - 编排层
//!
//! ## 职责
//!
//! 在固定并发上限下，为所有缓存未命中的讲解草稿驱动生成服务。
//!
//! ## 核心不变量
//!
//! 1. **独占取单**：共享队列的取出在持锁状态下完成，任何一条
//!    记录只会被一个工作者认领，绝不重复派发
//! 2. **协作式取消**：每轮取单前和每次生成调用返回后都检查取消
//!    信号；取消后不再开始新调用，已在途的调用结果直接丢弃，
//!    不做任何状态更新和失败记录
//! 3. **逐条终态**：每条记录恰好经历一次终态转换，失败只影响
//!    自身，调度器整体永远正常返回
//!
//! ## 重试
//!
//! 重试在生成服务内部完成，本层不叠加第二层重试。

use crate::models::{Explanation, GenerationOptions};
use crate::services::generation_service::{
    is_refusal_response, ExplanationGenerator, GenerationRequest,
};
use crate::services::FailureLog;
use crate::workflow::ProgressSink;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 默认并发上限
pub const DEFAULT_GENERATION_CONCURRENCY: usize = 3;

/// 生成调度器
pub struct GenerationScheduler {
    generator: Arc<dyn ExplanationGenerator>,
    failure_log: Arc<dyn FailureLog>,
    concurrency: usize,
}

/// 工作者共享的运行上下文
struct WorkerShared {
    queue: Mutex<VecDeque<(usize, Explanation)>>,
    finished: Mutex<Vec<Explanation>>,
    generator: Arc<dyn ExplanationGenerator>,
    failure_log: Arc<dyn FailureLog>,
    sink: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    options: GenerationOptions,
    total: usize,
}

impl GenerationScheduler {
    pub fn new(
        generator: Arc<dyn ExplanationGenerator>,
        failure_log: Arc<dyn FailureLog>,
        concurrency: usize,
    ) -> Self {
        Self {
            generator,
            failure_log,
            concurrency: concurrency.max(1),
        }
    }

    /// 运行调度，直到队列排空或观察到取消
    ///
    /// 返回传入的全部记录：完成的带终态，取消后没轮到的和在途
    /// 被丢弃结果的保持加载中状态原样返回，总数不变。
    pub async fn run(
        &self,
        pending: Vec<Explanation>,
        options: GenerationOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Vec<Explanation> {
        let total = pending.len();
        if total == 0 {
            return Vec::new();
        }

        let worker_count = self.concurrency.min(total);
        info!("⚙️ 启动 {} 个生成工作者，待生成 {} 条", worker_count, total);

        let shared = Arc::new(WorkerShared {
            queue: Mutex::new(pending.into_iter().enumerate().map(|(i, d)| (i + 1, d)).collect()),
            finished: Mutex::new(Vec::with_capacity(total)),
            generator: self.generator.clone(),
            failure_log: self.failure_log.clone(),
            sink,
            cancel,
            options,
            total,
        });

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 1..=worker_count {
            let shared = shared.clone();
            handles.push(tokio::spawn(worker_loop(worker_id, shared)));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("生成工作者异常退出: {}", e);
            }
        }

        // 取消时队列里剩下的草稿原样带回，保持记录总数不变
        let mut results: Vec<Explanation> = {
            let mut finished = shared.finished.lock().await;
            finished.drain(..).collect()
        };
        let mut leftover = shared.queue.lock().await;
        results.extend(leftover.drain(..).map(|(_, draft)| draft));

        results
    }
}

/// 单个工作者的取单循环
async fn worker_loop(worker_id: usize, shared: Arc<WorkerShared>) {
    loop {
        // 取消后不再开始新工作
        if shared.cancel.is_cancelled() {
            debug!("工作者 {} 观察到取消信号，停止取单", worker_id);
            break;
        }

        // 持锁完成取出，取出即认领
        let item = shared.queue.lock().await.pop_front();
        let Some((seq, draft)) = item else {
            debug!("工作者 {} 发现队列已空，退出", worker_id);
            break;
        };

        shared
            .sink
            .push_status(&format!("正在生成讲解 {}/{}…", seq, shared.total));

        let request = GenerationRequest {
            problem_text: draft.original_text.clone(),
            problem_image_png: draft.problem_image.clone(),
            options: shared.options,
        };

        let result = shared.generator.generate(&request).await;

        // 取消发生在调用在途期间：结果作废，记录保持加载中
        if shared.cancel.is_cancelled() {
            debug!("工作者 {} 丢弃取消期间完成的结果: {}", worker_id, draft.id);
            shared.finished.lock().await.push(draft);
            break;
        }

        let final_record = match result {
            Ok(generated) => {
                if is_refusal_response(&generated.markdown) {
                    warn!("⚠️ 讲解 {}/{} 被服务拒答", seq, shared.total);
                    shared
                        .failure_log
                        .log_failure(&draft, &generated.markdown)
                        .await;
                    draft.complete_failure()
                } else {
                    info!("✓ 讲解 {}/{} 生成完成", seq, shared.total);
                    draft.complete_success(
                        generated.markdown,
                        generated.core_concepts,
                        generated.difficulty,
                    )
                }
            }
            Err(e) => {
                error!("❌ 讲解 {}/{} 生成失败: {}", seq, shared.total, e);
                shared.failure_log.log_failure(&draft, &e.to_string()).await;
                draft.complete_failure()
            }
        };

        shared.sink.push_update(&final_record);
        shared.finished.lock().await.push(final_record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::models::GENERATION_FAILED_MESSAGE;
    use crate::services::generation_service::GeneratedExplanation;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 可编程的测试生成器
    struct ScriptedGenerator {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
        response: Box<dyn Fn(&GenerationRequest) -> Result<GeneratedExplanation, GenerationError> + Send + Sync>,
        cancel_during_call: Option<CancellationToken>,
    }

    impl ScriptedGenerator {
        fn ok_with(markdown: &'static str) -> Self {
            Self::with_response(Box::new(move |_| {
                Ok(GeneratedExplanation {
                    markdown: markdown.to_string(),
                    core_concepts: Some(vec!["概念".to_string()]),
                    difficulty: Some(3),
                })
            }))
        }

        fn with_response(
            response: Box<
                dyn Fn(&GenerationRequest) -> Result<GeneratedExplanation, GenerationError>
                    + Send
                    + Sync,
            >,
        ) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay: Duration::from_millis(20),
                response,
                cancel_during_call: None,
            }
        }
    }

    #[async_trait]
    impl ExplanationGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GeneratedExplanation, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(token) = &self.cancel_during_call {
                token.cancel();
            }
            tokio::time::sleep(self.delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            (self.response)(request)
        }
    }

    /// 收集所有失败记录的测试桩
    #[derive(Default)]
    struct CollectingFailureLog {
        entries: std::sync::Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl FailureLog for CollectingFailureLog {
        async fn log_failure(&self, record: &Explanation, reason: &str) {
            self.entries
                .lock()
                .unwrap()
                .push((record.id.clone(), reason.to_string()));
        }
    }

    /// 收集推送内容的测试桩
    #[derive(Default)]
    struct CollectingSink {
        statuses: std::sync::Mutex<Vec<String>>,
        updates: std::sync::Mutex<Vec<Explanation>>,
    }

    impl ProgressSink for CollectingSink {
        fn push_status(&self, message: &str) {
            self.statuses.lock().unwrap().push(message.to_string());
        }

        fn push_update(&self, record: &Explanation) {
            self.updates.lock().unwrap().push(record.clone());
        }
    }

    fn drafts(n: usize) -> Vec<Explanation> {
        (0..n)
            .map(|i| Explanation::draft(1, (i + 1) as u32, vec![i as u8], format!("题 {}", i + 1)))
            .collect()
    }

    fn scheduler(
        generator: Arc<ScriptedGenerator>,
        failure_log: Arc<CollectingFailureLog>,
        concurrency: usize,
    ) -> GenerationScheduler {
        GenerationScheduler::new(generator, failure_log, concurrency)
    }

    #[tokio::test]
    async fn test_all_records_reach_success() {
        let generator = Arc::new(ScriptedGenerator::ok_with("# 解析"));
        let failure_log = Arc::new(CollectingFailureLog::default());
        let sink = Arc::new(CollectingSink::default());

        let results = scheduler(generator.clone(), failure_log.clone(), 3)
            .run(
                drafts(5),
                GenerationOptions::default(),
                sink.clone(),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| !r.is_loading && !r.is_error));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 5);
        assert!(failure_log.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let generator = Arc::new(ScriptedGenerator::ok_with("ok"));
        let failure_log = Arc::new(CollectingFailureLog::default());
        let sink = Arc::new(CollectingSink::default());

        let results = scheduler(generator.clone(), failure_log, 3)
            .run(
                drafts(10),
                GenerationOptions::default(),
                sink,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 10);
        assert!(generator.max_in_flight.load(Ordering::SeqCst) <= 3);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_soft_failure_logged_exactly_once() {
        let generator = Arc::new(ScriptedGenerator::with_response(Box::new(|_| {
            Ok(GeneratedExplanation {
                markdown: "很抱歉，I cannot provide a solution for this image.".to_string(),
                core_concepts: None,
                difficulty: None,
            })
        })));
        let failure_log = Arc::new(CollectingFailureLog::default());
        let sink = Arc::new(CollectingSink::default());

        let results = scheduler(generator, failure_log.clone(), 2)
            .run(
                drafts(1),
                GenerationOptions::default(),
                sink,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 1);
        assert!(results[0].is_error);
        assert!(!results[0].is_loading);
        assert_eq!(results[0].markdown, GENERATION_FAILED_MESSAGE);

        let entries = failure_log.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].1.contains("cannot provide a solution"));
    }

    #[tokio::test]
    async fn test_hard_failure_uses_standard_message() {
        let generator = Arc::new(ScriptedGenerator::with_response(Box::new(|_| {
            Err(GenerationError::QuotaExhausted {
                detail: "insufficient_quota".to_string(),
            })
        })));
        let failure_log = Arc::new(CollectingFailureLog::default());
        let sink = Arc::new(CollectingSink::default());

        let results = scheduler(generator, failure_log.clone(), 2)
            .run(
                drafts(2),
                GenerationOptions::default(),
                sink,
                CancellationToken::new(),
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.is_error));
        assert!(results.iter().all(|r| r.markdown == GENERATION_FAILED_MESSAGE));
        let entries = failure_log.entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].1.contains("insufficient_quota"));
    }

    #[tokio::test]
    async fn test_precancelled_run_starts_nothing() {
        let generator = Arc::new(ScriptedGenerator::ok_with("ok"));
        let failure_log = Arc::new(CollectingFailureLog::default());
        let sink = Arc::new(CollectingSink::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = scheduler(generator.clone(), failure_log, 3)
            .run(drafts(4), GenerationOptions::default(), sink.clone(), cancel)
            .await;

        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.is_loading));
        assert!(sink.updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inflight_result_discarded_after_cancel() {
        let cancel = CancellationToken::new();
        let mut generator = ScriptedGenerator::ok_with("生成结果");
        generator.cancel_during_call = Some(cancel.clone());
        let generator = Arc::new(generator);
        let failure_log = Arc::new(CollectingFailureLog::default());
        let sink = Arc::new(CollectingSink::default());

        let results = scheduler(generator.clone(), failure_log.clone(), 1)
            .run(drafts(3), GenerationOptions::default(), sink.clone(), cancel)
            .await;

        // 第一条的结果在取消后返回，必须被丢弃
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_loading));
        assert!(sink.updates.lock().unwrap().is_empty());
        assert!(failure_log.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_duplicate_dispatch() {
        let generator = Arc::new(ScriptedGenerator::ok_with("ok"));
        let failure_log = Arc::new(CollectingFailureLog::default());
        let sink = Arc::new(CollectingSink::default());

        let results = scheduler(generator.clone(), failure_log, 4)
            .run(
                drafts(12),
                GenerationOptions::default(),
                sink,
                CancellationToken::new(),
            )
            .await;

        // 每条记录恰好生成一次
        assert_eq!(generator.calls.load(Ordering::SeqCst), 12);
        let mut ids: Vec<String> = results.iter().map(|r| r.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 12);
    }
}
