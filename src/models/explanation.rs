use serde::{Deserialize, Serialize};

/// 讲解生成失败时展示给用户的固定文案
///
/// 诊断细节只进失败日志，不进这条文案。
pub const GENERATION_FAILED_MESSAGE: &str = "抱歉，这道题的讲解生成失败了，请稍后重试。";

/// 讲解生成模式，透传给生成服务
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationMode {
    /// 快速模式
    Fast,
    /// 质量优先模式
    Quality,
    /// 默认模式
    Default,
}

impl ExplanationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplanationMode::Fast => "fast",
            ExplanationMode::Quality => "quality",
            ExplanationMode::Default => "default",
        }
    }
}

impl Default for ExplanationMode {
    fn default() -> Self {
        ExplanationMode::Default
    }
}

/// 一次分析的生成参数（对流水线不透明，原样透传）
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationOptions {
    pub mode: ExplanationMode,
    pub use_guidelines: bool,
}

/// 讲解记录
///
/// 流水线中唯一可变的核心记录。由编号装配器以 `is_loading=true`
/// 创建，之后恰好经历一次终态转换：
///
/// - 成功：`is_loading=false, is_error=false`
/// - 失败：`is_loading=false, is_error=true`
/// - 缓存命中：直接进入成功终态，且 `is_golden=true`
///
/// 记录通过进度回调整体替换，绝不在两处并发修改同一条。
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    /// 本次运行内唯一的记录 ID
    pub id: String,
    /// 讲解正文（Markdown）
    pub markdown: String,
    pub is_loading: bool,
    pub is_error: bool,
    pub is_golden: bool,
    pub page_number: u32,
    pub problem_number: u32,
    /// 题目区域裁剪图（PNG 编码字节），同时是缓存键的摘要输入
    #[serde(skip_serializing)]
    pub problem_image: Vec<u8>,
    /// 检测服务转录出的题目原文
    pub original_text: String,
    pub core_concepts: Option<Vec<String>>,
    pub difficulty: Option<u8>,
}

impl Explanation {
    /// 创建加载中的草稿记录
    pub fn draft(
        page_number: u32,
        problem_number: u32,
        problem_image: Vec<u8>,
        original_text: String,
    ) -> Self {
        Self {
            id: format!("p{}-q{}", page_number, problem_number),
            markdown: String::new(),
            is_loading: true,
            is_error: false,
            is_golden: false,
            page_number,
            problem_number,
            problem_image,
            original_text,
            core_concepts: None,
            difficulty: None,
        }
    }

    /// 成功终态
    pub fn complete_success(
        mut self,
        markdown: String,
        core_concepts: Option<Vec<String>>,
        difficulty: Option<u8>,
    ) -> Self {
        self.markdown = markdown;
        self.core_concepts = core_concepts;
        self.difficulty = difficulty;
        self.is_loading = false;
        self.is_error = false;
        self
    }

    /// 缓存命中直达的成功终态
    pub fn complete_golden(
        self,
        markdown: String,
        core_concepts: Option<Vec<String>>,
        difficulty: Option<u8>,
    ) -> Self {
        let mut record = self.complete_success(markdown, core_concepts, difficulty);
        record.is_golden = true;
        record
    }

    /// 失败终态，正文替换为固定文案
    pub fn complete_failure(mut self) -> Self {
        self.markdown = GENERATION_FAILED_MESSAGE.to_string();
        self.is_loading = false;
        self.is_error = true;
        self
    }
}
