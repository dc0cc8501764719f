//! 讲解生成服务 - 业务能力层
//!
//! 只负责"给一道题生成讲解"的能力，不关心流程
//!
//! ## 重试语义
//! - 限流、服务不可用等瞬态错误在本服务内部重试，最多 3 次，
//!   间隔按指数翻倍
//! - 配额耗尽永不重试，立即上抛
//! - 调度器不再叠加第二层重试，本服务重试耗尽即为该题的终态失败

use crate::config::Config;
use crate::error::GenerationError;
use crate::models::{ExplanationMode, GenerationOptions};
use crate::utils::image::png_data_url;
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
use std::time::Duration;
use tracing::{debug, warn};

/// 拒答特征短语
///
/// 生成服务的响应是非结构化文本，只能靠子串匹配识别"服务答了
/// 但拒绝解题"。短语全部小写存放，匹配前先把响应转小写。
const SOFT_FAILURE_PHRASES: &[&str] = &[
    "cannot provide a solution",
    "unable to provide a solution",
    "cannot solve this problem",
    "i'm unable to solve",
    "无法提供解答",
    "无法解答这道题",
    "无法为这道题提供讲解",
];

/// 判断响应内容是否为拒答
///
/// 唯一的拒答分类入口，后续若生成服务提供结构化状态码，
/// 只需要改这里。
pub fn is_refusal_response(text: &str) -> bool {
    let lower = text.to_lowercase();
    SOFT_FAILURE_PHRASES
        .iter()
        .any(|phrase| lower.contains(phrase))
}

/// 单次生成请求
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub problem_text: String,
    /// 题目区域的 PNG 裁剪图
    pub problem_image_png: Vec<u8>,
    pub options: GenerationOptions,
}

/// 生成结果
#[derive(Debug, Clone)]
pub struct GeneratedExplanation {
    pub markdown: String,
    pub core_concepts: Option<Vec<String>>,
    pub difficulty: Option<u8>,
}

/// 讲解生成能力
#[async_trait]
pub trait ExplanationGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedExplanation, GenerationError>;
}

/// 基于视觉 LLM 的生成实现
pub struct LlmGenerator {
    client: Client<OpenAIConfig>,
    model_fast: String,
    model_quality: String,
    model_default: String,
    guidelines: Option<String>,
    max_attempts: u32,
    base_delay: Duration,
}

impl LlmGenerator {
    /// 创建生成服务，可附带讲解指南文本
    pub fn with_guidelines(config: &Config, guidelines: Option<String>) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_fast: config.generation_model_fast.clone(),
            model_quality: config.generation_model_quality.clone(),
            model_default: config.generation_model_default.clone(),
            guidelines,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    fn model_for(&self, mode: ExplanationMode) -> &str {
        match mode {
            ExplanationMode::Fast => &self.model_fast,
            ExplanationMode::Quality => &self.model_quality,
            ExplanationMode::Default => &self.model_default,
        }
    }

    fn build_system_prompt(&self, options: &GenerationOptions) -> String {
        let mut prompt = String::from(
            "你是一名耐心的学科老师。根据题目图片和转录文字，为学生写一份讲解。\
             先给出思路，再分步推导，最后总结答案。\
             用 JSON 对象返回，字段：markdown（讲解正文，Markdown 格式）、\
             core_concepts（涉及的核心概念列表）、difficulty（难度 1 到 5 的整数）。",
        );
        if options.use_guidelines {
            if let Some(guidelines) = &self.guidelines {
                prompt.push_str("\n\n讲解时遵循以下指南：\n");
                prompt.push_str(guidelines);
            }
        }
        prompt
    }

    /// 单次调用，不含重试
    async fn call_once(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedExplanation, GenerationError> {
        let model = self.model_for(request.options.mode);
        debug!(
            "调用生成服务，模型: {}，题干长度: {} 字符",
            model,
            request.problem_text.len()
        );

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(self.build_system_prompt(&request.options))
            .build()
            .map_err(classify_generation_error)?;

        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: format!("题目原文：\n{}", request.problem_text),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: png_data_url(&request.problem_image_png),
                        detail: Some(ImageDetail::Auto),
                    },
                },
            ),
        ];

        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()
            .map_err(classify_generation_error)?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.3)
            .max_tokens(4096u32)
            .build()
            .map_err(classify_generation_error)?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(classify_generation_error)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(GenerationError::EmptyResponse {
                model: model.to_string(),
            });
        }

        Ok(parse_generation_payload(&content))
    }
}

#[async_trait]
impl ExplanationGenerator for LlmGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedExplanation, GenerationError> {
        let mut delay = self.base_delay;

        for attempt in 1..=self.max_attempts {
            match self.call_once(request).await {
                Ok(generated) => return Ok(generated),
                Err(e) if matches!(e, GenerationError::QuotaExhausted { .. }) => {
                    warn!("配额耗尽，不重试: {}", e);
                    return Err(e);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        "生成调用第 {}/{} 次失败，{:?} 后重试: {}",
                        attempt, self.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }

        // 循环内的最后一次尝试要么返回结果要么返回错误，到不了这里
        Err(GenerationError::CallFailed {
            detail: "重试次数耗尽".to_string(),
        })
    }
}

/// 按错误消息特征归类生成错误
pub fn classify_generation_error(err: async_openai::error::OpenAIError) -> GenerationError {
    classify_error_message(&err.to_string())
}

fn classify_error_message(detail: &str) -> GenerationError {
    let lower = detail.to_lowercase();
    let detail = detail.to_string();
    if lower.contains("insufficient_quota") || lower.contains("quota") || lower.contains("billing")
    {
        GenerationError::QuotaExhausted { detail }
    } else if lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("429")
        || lower.contains("too many requests")
    {
        GenerationError::RateLimited { detail }
    } else if lower.contains("unavailable")
        || lower.contains("overloaded")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("timed out")
    {
        GenerationError::ServiceUnavailable { detail }
    } else {
        GenerationError::CallFailed { detail }
    }
}

#[derive(Debug, serde::Deserialize)]
struct GenerationPayload {
    #[serde(default, alias = "explanation")]
    markdown: Option<String>,
    #[serde(default)]
    core_concepts: Option<Vec<String>>,
    #[serde(default)]
    difficulty: Option<u8>,
}

/// 解析生成响应
///
/// 期望 JSON 对象，解析不出来就把整段文本当作讲解正文。
fn parse_generation_payload(content: &str) -> GeneratedExplanation {
    let trimmed = content.trim();
    let payload = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim().strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<GenerationPayload>(payload) {
        Ok(parsed) => GeneratedExplanation {
            markdown: parsed.markdown.unwrap_or_else(|| content.to_string()),
            core_concepts: parsed.core_concepts,
            difficulty: parsed.difficulty,
        },
        Err(_) => GeneratedExplanation {
            markdown: content.to_string(),
            core_concepts: None,
            difficulty: None,
        },
    }
}
