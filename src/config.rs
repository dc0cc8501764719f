/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 同时进行的讲解生成数量
    pub max_concurrent_generations: usize,
    /// 整册文档渲染的目标像素宽度
    pub render_page_width: u32,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 失败记录文件
    pub failure_log_file: String,
    /// 失败题目截图目录
    pub failure_image_dir: String,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    /// 题目检测模型
    pub detection_model_name: String,
    /// 题目检测指令集，为空视为致命配置错误
    pub detection_instructions: String,
    /// 各生成模式对应的模型
    pub generation_model_fast: String,
    pub generation_model_quality: String,
    pub generation_model_default: String,
    /// 讲解指南文件路径
    pub guideline_file: String,
    // --- 讲解缓存配置 ---
    /// 缓存服务地址，为空表示禁用缓存
    pub cache_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_generations:
                crate::orchestrator::scheduler::DEFAULT_GENERATION_CONCURRENCY,
            render_page_width: 1600,
            verbose_logging: false,
            failure_log_file: "failures.log".to_string(),
            failure_image_dir: "failures".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            detection_model_name: "gpt-4o-mini".to_string(),
            detection_instructions:
                crate::services::detection_service::DEFAULT_DETECTION_INSTRUCTIONS.to_string(),
            generation_model_fast: "gpt-4o-mini".to_string(),
            generation_model_quality: "gpt-4o".to_string(),
            generation_model_default: "gpt-4o".to_string(),
            guideline_file: "guidelines.toml".to_string(),
            cache_base_url: String::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_generations: std::env::var("MAX_CONCURRENT_GENERATIONS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_concurrent_generations),
            render_page_width: std::env::var("RENDER_PAGE_WIDTH").ok().and_then(|v| v.parse().ok()).unwrap_or(default.render_page_width),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            failure_log_file: std::env::var("FAILURE_LOG_FILE").unwrap_or(default.failure_log_file),
            failure_image_dir: std::env::var("FAILURE_IMAGE_DIR").unwrap_or(default.failure_image_dir),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            detection_model_name: std::env::var("DETECTION_MODEL_NAME").unwrap_or(default.detection_model_name),
            detection_instructions: std::env::var("DETECTION_INSTRUCTIONS").unwrap_or(default.detection_instructions),
            generation_model_fast: std::env::var("GENERATION_MODEL_FAST").unwrap_or(default.generation_model_fast),
            generation_model_quality: std::env::var("GENERATION_MODEL_QUALITY").unwrap_or(default.generation_model_quality),
            generation_model_default: std::env::var("GENERATION_MODEL_DEFAULT").unwrap_or(default.generation_model_default),
            guideline_file: std::env::var("GUIDELINE_FILE").unwrap_or(default.guideline_file),
            cache_base_url: std::env::var("CACHE_BASE_URL").unwrap_or(default.cache_base_url),
        }
    }
}
