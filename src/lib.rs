//! # Paper Explain
//!
//! 一个把扫描试卷变成逐题讲解的 Rust 处理流水线
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 数据层（Models）
//! - `models/` - 流水线中流转的记录
//! - `PageImage` / `DetectedProblem` - 页面与检测候选
//! - `Explanation` - 唯一的可变核心记录，恰好一次终态转换
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个对象
//! - `PageExtractor` - 文件 → 页面序列能力
//! - `LlmDetector` / `LlmGenerator` - 检测与生成能力
//! - `HttpExplanationCache` - 内容寻址缓存查询能力
//! - `FailureWriter` - 失败落盘能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 纯流程与进度契约
//! - `assemble` - 排序、题号解析、裁剪
//! - `ProgressSink` - 状态与记录更新的推送接口
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/pipeline` - 分析流水线，阶段推进与统计
//! - `orchestrator/scheduler` - 有界工作者池与协作式取消
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{PipelineError, PipelineResult};
pub use models::{
    BBox, DetectedProblem, Explanation, ExplanationMode, GenerationOptions, InputFile, PageImage,
    ProblemType, GENERATION_FAILED_MESSAGE,
};
pub use orchestrator::{AnalysisPipeline, GenerationScheduler};
pub use services::{
    content_digest, ExplanationCache, ExplanationGenerator, FailureLog, PageExtractor,
    ProblemDetector,
};
pub use workflow::{ProgressSink, TracingProgressSink};
