use std::fmt;

/// 流水线错误类型
#[derive(Debug)]
pub enum PipelineError {
    /// 页面提取错误
    Extract(ExtractError),
    /// 题目检测错误
    Detect(DetectError),
    /// 讲解生成错误
    Generation(GenerationError),
    /// 缓存访问错误
    Cache(CacheError),
    /// 配置错误
    Config(ConfigError),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Extract(e) => write!(f, "页面提取错误: {}", e),
            PipelineError::Detect(e) => write!(f, "题目检测错误: {}", e),
            PipelineError::Generation(e) => write!(f, "讲解生成错误: {}", e),
            PipelineError::Cache(e) => write!(f, "缓存错误: {}", e),
            PipelineError::Config(e) => write!(f, "配置错误: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Extract(e) => Some(e),
            PipelineError::Detect(e) => Some(e),
            PipelineError::Generation(e) => Some(e),
            PipelineError::Cache(e) => Some(e),
            PipelineError::Config(e) => Some(e),
        }
    }
}

/// 页面提取错误
#[derive(Debug)]
pub enum ExtractError {
    /// 整册文档打开失败
    DocumentOpenFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 单页渲染失败
    PageRenderFailed {
        page: u32,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 图片解码失败
    ImageDecodeFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 题目区域裁剪失败
    CropFailed {
        page: u32,
        detail: String,
    },
    /// 输入文件为空
    EmptyFile {
        name: String,
    },
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::DocumentOpenFailed { source } => {
                write!(f, "整册文档打开失败: {}", source)
            }
            ExtractError::PageRenderFailed { page, source } => {
                write!(f, "第 {} 页渲染失败: {}", page, source)
            }
            ExtractError::ImageDecodeFailed { source } => {
                write!(f, "图片解码失败: {}", source)
            }
            ExtractError::CropFailed { page, detail } => {
                write!(f, "第 {} 页题目裁剪失败: {}", page, detail)
            }
            ExtractError::EmptyFile { name } => write!(f, "输入文件为空: {}", name),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::DocumentOpenFailed { source }
            | ExtractError::PageRenderFailed { source, .. }
            | ExtractError::ImageDecodeFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 题目检测错误
#[derive(Debug)]
pub enum DetectError {
    /// 检测服务调用失败
    ServiceCallFailed {
        page: u32,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 检测结果解析失败
    ResponseParseFailed {
        page: u32,
        detail: String,
    },
    /// 缺少检测指令集
    MissingInstructions,
    /// 凭证被服务拒绝
    Unauthorized {
        detail: String,
    },
}

impl DetectError {
    /// 配置类错误会中止整批分析，逐页错误只影响当前页
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DetectError::MissingInstructions | DetectError::Unauthorized { .. }
        )
    }
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectError::ServiceCallFailed { page, source } => {
                write!(f, "第 {} 页检测服务调用失败: {}", page, source)
            }
            DetectError::ResponseParseFailed { page, detail } => {
                write!(f, "第 {} 页检测结果解析失败: {}", page, detail)
            }
            DetectError::MissingInstructions => {
                write!(f, "检测指令集为空，无法创建检测服务")
            }
            DetectError::Unauthorized { detail } => {
                write!(f, "检测服务拒绝了当前凭证: {}", detail)
            }
        }
    }
}

impl std::error::Error for DetectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DetectError::ServiceCallFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 讲解生成错误
///
/// 变体按重试语义划分：限流和服务不可用属于瞬态错误，
/// 由生成服务内部按指数退避重试；配额耗尽永不重试。
#[derive(Debug)]
pub enum GenerationError {
    /// 请求被限流
    RateLimited {
        detail: String,
    },
    /// 服务暂时不可用
    ServiceUnavailable {
        detail: String,
    },
    /// 配额耗尽
    QuotaExhausted {
        detail: String,
    },
    /// 其他调用失败
    CallFailed {
        detail: String,
    },
    /// 返回内容为空
    EmptyResponse {
        model: String,
    },
}

impl GenerationError {
    /// 瞬态错误允许有限次重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GenerationError::RateLimited { .. } | GenerationError::ServiceUnavailable { .. }
        )
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::RateLimited { detail } => {
                write!(f, "生成请求被限流: {}", detail)
            }
            GenerationError::ServiceUnavailable { detail } => {
                write!(f, "生成服务暂时不可用: {}", detail)
            }
            GenerationError::QuotaExhausted { detail } => {
                write!(f, "生成服务配额耗尽: {}", detail)
            }
            GenerationError::CallFailed { detail } => {
                write!(f, "生成服务调用失败: {}", detail)
            }
            GenerationError::EmptyResponse { model } => {
                write!(f, "生成服务返回内容为空 (模型: {})", model)
            }
        }
    }
}

impl std::error::Error for GenerationError {}

/// 缓存访问错误
///
/// 缓存错误一律按未命中处理，只做诊断日志，永不向上传播。
#[derive(Debug)]
pub enum CacheError {
    /// 网络请求失败
    RequestFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 服务返回异常状态码
    BadStatus {
        status: u16,
    },
    /// JSON 解析失败
    JsonParseFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::RequestFailed { source } => {
                write!(f, "缓存请求失败: {}", source)
            }
            CacheError::BadStatus { status } => {
                write!(f, "缓存服务返回异常状态码: {}", status)
            }
            CacheError::JsonParseFailed { source } => {
                write!(f, "缓存结果解析失败: {}", source)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::RequestFailed { source } | CacheError::JsonParseFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
            _ => None,
        }
    }
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 讲解指南文件加载失败
    GuidelineLoadFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::GuidelineLoadFailed { path, source } => {
                write!(f, "讲解指南文件加载失败 ({}): {}", path, source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::GuidelineLoadFailed { source, .. } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
        }
    }
}

// ========== 从子错误类型转换 ==========
// 注意：不需要手动实现 From<PipelineError> for anyhow::Error，
// 因为 anyhow 已经为所有实现了 std::error::Error 的类型提供了自动实现

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        PipelineError::Extract(err)
    }
}

impl From<DetectError> for PipelineError {
    fn from(err: DetectError) -> Self {
        PipelineError::Detect(err)
    }
}

impl From<GenerationError> for PipelineError {
    fn from(err: GenerationError) -> Self {
        PipelineError::Generation(err)
    }
}

impl From<CacheError> for PipelineError {
    fn from(err: CacheError) -> Self {
        PipelineError::Cache(err)
    }
}

impl From<ConfigError> for PipelineError {
    fn from(err: ConfigError) -> Self {
        PipelineError::Config(err)
    }
}

// ========== 便捷构造函数 ==========

impl ExtractError {
    /// 创建整册打开失败错误
    pub fn document_open_failed(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        ExtractError::DocumentOpenFailed {
            source: Box::new(source),
        }
    }

    /// 创建单页渲染失败错误
    pub fn page_render_failed(
        page: u32,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ExtractError::PageRenderFailed {
            page,
            source: Box::new(source),
        }
    }

    /// 创建图片解码失败错误
    pub fn image_decode_failed(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        ExtractError::ImageDecodeFailed {
            source: Box::new(source),
        }
    }
}

impl DetectError {
    /// 创建检测服务调用失败错误
    pub fn service_call_failed(
        page: u32,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DetectError::ServiceCallFailed {
            page,
            source: Box::new(source),
        }
    }
}

// ========== Result 类型别名 ==========

/// 流水线结果类型
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_error_fatality() {
        assert!(DetectError::MissingInstructions.is_fatal());
        assert!(DetectError::Unauthorized {
            detail: "invalid api key".to_string()
        }
        .is_fatal());
        assert!(!DetectError::ResponseParseFailed {
            page: 3,
            detail: "bad json".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_generation_error_transience() {
        assert!(GenerationError::RateLimited {
            detail: "429".to_string()
        }
        .is_transient());
        assert!(GenerationError::ServiceUnavailable {
            detail: "503".to_string()
        }
        .is_transient());
        assert!(!GenerationError::QuotaExhausted {
            detail: "insufficient_quota".to_string()
        }
        .is_transient());
        assert!(!GenerationError::CallFailed {
            detail: "boom".to_string()
        }
        .is_transient());
    }
}
