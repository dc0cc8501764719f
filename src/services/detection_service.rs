//! 题目检测服务 - 业务能力层
//!
//! 只负责"一页图里有哪些题"的能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 调用兼容 OpenAI API 的视觉模型
//! - 页面图像以 base64 data URL 形式随消息发送
//! - 返回 JSON 数组，解析前先剥掉可能的代码围栏

use crate::config::Config;
use crate::error::DetectError;
use crate::models::{DetectedProblem, PageImage};
use crate::utils::image::{encode_png, png_data_url};
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use tracing::debug;

/// 内置的检测指令集
///
/// 可通过 DETECTION_INSTRUCTIONS 环境变量整体替换。
pub const DEFAULT_DETECTION_INSTRUCTIONS: &str = r#"你是一名试卷版面分析助手。给你一张试卷页面图片，请找出其中所有独立的题目区域。

对每道题返回一个 JSON 对象，字段如下：
- bbox: {"x_min", "y_min", "x_max", "y_max"}，相对页面宽高的归一化坐标，取值 0 到 1
- problem_type: "multiple_choice" 或 "free_response"
- body: 题干的完整转录文字
- choices: 选择题的选项文字，没有则省略
- number_label: 题目开头的编号原文（如 "3." 或 "（2）"），没有则省略

只返回 JSON 数组，不要任何其他内容。页面上没有题目时返回 []。"#;

/// 题目检测能力
///
/// 一次只看一页，失败分类交给调用方：`is_fatal` 的错误会中止
/// 整批分析，其余错误按该页无题目处理。
#[async_trait]
pub trait ProblemDetector: Send + Sync {
    async fn detect(&self, page: &PageImage) -> Result<Vec<DetectedProblem>, DetectError>;
}

/// 基于视觉 LLM 的检测实现
pub struct LlmDetector {
    client: Client<OpenAIConfig>,
    model_name: String,
    instructions: String,
}

impl LlmDetector {
    /// 创建检测服务
    ///
    /// 指令集为空是配置类致命错误，直接拒绝构造。
    pub fn new(config: &Config) -> Result<Self, DetectError> {
        let instructions = config.detection_instructions.trim();
        if instructions.is_empty() {
            return Err(DetectError::MissingInstructions);
        }

        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Ok(Self {
            client: Client::with_config(openai_config),
            model_name: config.detection_model_name.clone(),
            instructions: instructions.to_string(),
        })
    }

    /// 解析检测响应并收束所有包围盒
    fn parse_response(
        &self,
        page_number: u32,
        content: &str,
    ) -> Result<Vec<DetectedProblem>, DetectError> {
        let payload = strip_code_fence(content);
        let problems: Vec<DetectedProblem> =
            serde_json::from_str(payload).map_err(|e| DetectError::ResponseParseFailed {
                page: page_number,
                detail: e.to_string(),
            })?;

        Ok(problems
            .into_iter()
            .map(|mut p| {
                p.bbox = p.bbox.clamped();
                p
            })
            .collect())
    }
}

#[async_trait]
impl ProblemDetector for LlmDetector {
    async fn detect(&self, page: &PageImage) -> Result<Vec<DetectedProblem>, DetectError> {
        debug!(
            "检测第 {} 页，模型: {}，页面尺寸 {}x{}",
            page.page_number,
            self.model_name,
            page.image.width(),
            page.image.height()
        );

        let png = encode_png(&page.image).map_err(|e| DetectError::ResponseParseFailed {
            page: page.page_number,
            detail: format!("页面编码失败: {}", e),
        })?;

        let page_number = page.page_number;
        let classify = move |e| classify_detect_error(page_number, e);

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(self.instructions.as_str())
            .build()
            .map_err(classify)?;

        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: format!("这是试卷的第 {} 页，请检测所有题目。", page.page_number),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: png_data_url(&png),
                        detail: Some(ImageDetail::Auto),
                    },
                },
            ),
        ];

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()
            .map_err(classify)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.0)
            .max_tokens(4096u32)
            .build()
            .map_err(classify)?;

        let response = self.client.chat().create(request).await.map_err(classify)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| DetectError::ResponseParseFailed {
                page: page.page_number,
                detail: "服务返回内容为空".to_string(),
            })?;

        let problems = self.parse_response(page.page_number, &content)?;
        debug!("第 {} 页检测到 {} 道题", page.page_number, problems.len());
        Ok(problems)
    }
}

/// 把服务端错误归类为配置类（致命）或单页调用失败
fn classify_detect_error(
    page: u32,
    err: impl std::error::Error + Send + Sync + 'static,
) -> DetectError {
    let detail = err.to_string();
    let lower = detail.to_lowercase();
    if lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("unauthorized")
        || lower.contains("401")
    {
        DetectError::Unauthorized { detail }
    } else {
        DetectError::service_call_failed(page, err)
    }
}

/// 剥掉响应外层可能包裹的 Markdown 代码围栏
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.trim().strip_suffix("```") {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            llm_api_key: "test-key".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_empty_instructions_is_fatal() {
        let config = Config {
            detection_instructions: "   ".to_string(),
            ..test_config()
        };
        let err = LlmDetector::new(&config).err().unwrap();
        assert!(matches!(err, DetectError::MissingInstructions));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("[]"), "[]");
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n[2]\n```"), "[2]");
        assert_eq!(strip_code_fence("  [3]  "), "[3]");
    }

    #[test]
    fn test_parse_response_clamps_bbox() {
        let detector = LlmDetector::new(&test_config()).unwrap();
        let content = r#"[
            {
                "bbox": {"x_min": -0.2, "y_min": 0.3, "x_max": 1.5, "y_max": 0.1},
                "problem_type": "free_response",
                "body": "证明下列不等式"
            }
        ]"#;
        let problems = detector.parse_response(1, content).unwrap();
        assert_eq!(problems.len(), 1);
        let bbox = problems[0].bbox;
        assert_eq!(bbox.x_min, 0.0);
        assert_eq!(bbox.x_max, 1.0);
        assert_eq!(bbox.y_min, 0.1);
        assert_eq!(bbox.y_max, 0.3);
    }

    #[test]
    fn test_parse_response_rejects_bad_json() {
        let detector = LlmDetector::new(&test_config()).unwrap();
        let err = detector.parse_response(2, "不是 JSON").err().unwrap();
        assert!(matches!(err, DetectError::ResponseParseFailed { page: 2, .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_classify_unauthorized_is_fatal() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "Incorrect API key provided");
        assert!(classify_detect_error(1, err).is_fatal());

        let err = std::io::Error::new(std::io::ErrorKind::Other, "connection refused");
        assert!(!classify_detect_error(1, err).is_fatal());
    }
}
