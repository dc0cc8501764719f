//! 分析流水线 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个库的入口，负责把输入文件一路推进到讲解记录集合。
//!
//! ## 阶段顺序
//!
//! 1. **页面提取**：逐文件嗅探并产出页面序列
//! 2. **题目检测**：全部页面并发发起，不设并发上限
//! 3. **编号装配**：纯同步，排序、题号、裁剪
//! 4. **缓存查询**：逐条顺序查询，命中的直达金色终态，
//!    这是正确性要求：已有缓存条目的记录绝不进入生成队列
//! 5. **生成调度**：只为未命中记录启动有界工作者池
//!
//! ## 设计特点
//!
//! - **显式构造**：所有协作方经构造函数注入，没有进程级单例
//! - **逐条隔离**：单条记录的失败不影响兄弟记录
//! - **协作式取消**：各阶段在迭代边界检查同一个取消信号

use crate::config::Config;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    load_guidelines, DetectedProblem, Explanation, GenerationOptions, InputFile, PageImage,
};
use crate::orchestrator::scheduler::GenerationScheduler;
use crate::services::{
    content_digest, ExplanationCache, ExplanationGenerator, FailureLog, FailureWriter,
    HttpExplanationCache, LlmDetector, LlmGenerator, NoopExplanationCache, PageExtractor,
    ProblemDetector,
};
use crate::workflow::{assemble, ProgressSink};
use futures::future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 分析流水线
pub struct AnalysisPipeline {
    extractor: PageExtractor,
    detector: Arc<dyn ProblemDetector>,
    generator: Arc<dyn ExplanationGenerator>,
    cache: Arc<dyn ExplanationCache>,
    failure_log: Arc<dyn FailureLog>,
    max_concurrent_generations: usize,
}

impl AnalysisPipeline {
    /// 按配置装配生产用的协作方
    pub async fn from_config(config: &Config) -> PipelineResult<Self> {
        let detector = LlmDetector::new(config).map_err(PipelineError::Detect)?;
        let guidelines = load_guidelines(&config.guideline_file).await?;
        let generator = LlmGenerator::with_guidelines(config, guidelines);

        let cache: Arc<dyn ExplanationCache> = if config.cache_base_url.trim().is_empty() {
            Arc::new(NoopExplanationCache)
        } else {
            Arc::new(HttpExplanationCache::new(config.cache_base_url.clone()))
        };

        Ok(Self::new(
            PageExtractor::new(config.render_page_width),
            Arc::new(detector),
            Arc::new(generator),
            cache,
            Arc::new(FailureWriter::with_paths(
                config.failure_log_file.clone(),
                config.failure_image_dir.clone(),
            )),
            config.max_concurrent_generations,
        ))
    }

    /// 显式注入协作方
    pub fn new(
        extractor: PageExtractor,
        detector: Arc<dyn ProblemDetector>,
        generator: Arc<dyn ExplanationGenerator>,
        cache: Arc<dyn ExplanationCache>,
        failure_log: Arc<dyn FailureLog>,
        max_concurrent_generations: usize,
    ) -> Self {
        Self {
            extractor,
            detector,
            generator,
            cache,
            failure_log,
            max_concurrent_generations,
        }
    }

    /// 运行完整分析
    ///
    /// 返回按题号升序的全部讲解记录。取消后已经终态的记录保持
    /// 终态，没轮到的保持加载中，记录总数与检测出的题目数一致。
    pub async fn analyze(
        &self,
        files: Vec<InputFile>,
        options: GenerationOptions,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> PipelineResult<Vec<Explanation>> {
        log_analysis_start(files.len());

        // ========== 阶段 1: 页面提取 ==========
        let pages = self.extract_pages(&files, sink.as_ref(), &cancel)?;
        if pages.is_empty() {
            warn!("⚠️ 没有得到任何页面，分析结束");
            return Ok(Vec::new());
        }
        sink.push_status(&format!("共 {} 页，开始检测题目…", pages.len()));

        // ========== 阶段 2: 题目检测 ==========
        if cancel.is_cancelled() {
            info!("🛑 分析在检测阶段前被取消");
            return Ok(Vec::new());
        }
        let detected = self.detect_problems(&pages, sink.as_ref()).await?;
        let total_detected = detected.len();
        sink.push_status(&format!("共检测到 {} 道题", total_detected));
        if total_detected == 0 {
            return Ok(Vec::new());
        }

        // ========== 阶段 3: 编号装配 ==========
        if cancel.is_cancelled() {
            info!("🛑 分析在装配阶段前被取消");
            return Ok(Vec::new());
        }
        let drafts = assemble(&pages, detected);
        for draft in &drafts {
            sink.push_update(draft);
        }

        // ========== 阶段 4: 缓存查询（顺序逐条） ==========
        let total = drafts.len();
        let mut golden = Vec::new();
        let mut pending = Vec::new();
        for (idx, draft) in drafts.into_iter().enumerate() {
            if cancel.is_cancelled() {
                pending.push(draft);
                continue;
            }

            sink.push_status(&format!("正在创建讲解 {}/{}…", idx + 1, total));
            let key = content_digest(&draft.problem_image);
            match self.cache.lookup(&key).await {
                Some(cached) => {
                    info!("✨ 讲解 {}/{} 命中缓存", idx + 1, total);
                    let record = draft.complete_golden(
                        cached.markdown,
                        cached.core_concepts,
                        cached.difficulty,
                    );
                    sink.push_update(&record);
                    golden.push(record);
                }
                None => pending.push(draft),
            }
        }

        // ========== 阶段 5: 生成调度 ==========
        let scheduler = GenerationScheduler::new(
            self.generator.clone(),
            self.failure_log.clone(),
            self.max_concurrent_generations,
        );
        let generated = scheduler
            .run(pending, options, sink.clone(), cancel.clone())
            .await;

        // ========== 汇总 ==========
        let mut records = golden;
        records.extend(generated);
        records.sort_by_key(|r| r.problem_number);

        log_final_stats(&records);
        Ok(records)
    }

    /// 阶段 1：逐文件提取页面，页码跨文件连续
    fn extract_pages(
        &self,
        files: &[InputFile],
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> PipelineResult<Vec<PageImage>> {
        let mut pages = Vec::new();
        let mut next_page_number = 1u32;

        for file in files {
            if cancel.is_cancelled() {
                info!("🛑 页面提取被取消");
                break;
            }

            sink.push_status(&format!("正在读取文件 {}…", file.name));
            let extracted = self.extractor.extract(file, next_page_number, sink, cancel)?;
            if let Some(last) = extracted.last() {
                next_page_number = last.page_number + 1;
            }
            pages.extend(extracted);
        }

        Ok(pages)
    }

    /// 阶段 2：全部页面并发检测，无并发上限
    ///
    /// 单页失败按该页无题目处理；配置类错误中止整批分析。
    async fn detect_problems(
        &self,
        pages: &[PageImage],
        sink: &dyn ProgressSink,
    ) -> PipelineResult<Vec<(u32, DetectedProblem)>> {
        let calls = pages
            .iter()
            .map(|page| async move { (page.page_number, self.detector.detect(page).await) });
        let results = future::join_all(calls).await;

        let mut detected = Vec::new();
        for (page_number, result) in results {
            match result {
                Ok(problems) => {
                    sink.push_status(&format!(
                        "第 {} 页检测到 {} 道题",
                        page_number,
                        problems.len()
                    ));
                    detected.extend(problems.into_iter().map(|p| (page_number, p)));
                }
                Err(e) if e.is_fatal() => {
                    error!("❌ 检测配置错误，中止分析: {}", e);
                    return Err(PipelineError::Detect(e));
                }
                Err(e) => {
                    // 逐页兜底：失败页贡献空结果
                    error!("第 {} 页检测失败，按无题目处理: {}", page_number, e);
                }
            }
        }

        Ok(detected)
    }
}

// ========== 日志辅助函数 ==========

fn log_analysis_start(file_count: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 开始分析，共 {} 个输入文件", file_count);
    info!("{}", "=".repeat(60));
}

fn log_final_stats(records: &[Explanation]) {
    let success = records
        .iter()
        .filter(|r| !r.is_loading && !r.is_error)
        .count();
    let golden = records.iter().filter(|r| r.is_golden).count();
    let failed = records.iter().filter(|r| r.is_error).count();
    let unfinished = records.iter().filter(|r| r.is_loading).count();

    info!("\n{}", "=".repeat(60));
    info!("📊 分析完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{} (其中缓存命中 {})", success, records.len(), golden);
    info!("❌ 失败: {}", failed);
    if unfinished > 0 {
        info!("⏸️ 取消时未完成: {}", unfinished);
    }
    info!("{}", "=".repeat(60));
}
