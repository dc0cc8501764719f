//! 讲解缓存服务 - 业务能力层
//!
//! 按内容寻址查询既有讲解：键是题目裁剪图 PNG 字节的 SHA-256
//! 摘要。流水线只读缓存，写入由外部的整理流程负责。任何缓存
//! 访问失败都按未命中处理，只记诊断日志，绝不向上传播。

use crate::error::CacheError;
use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// 计算内容摘要（SHA-256 十六进制）
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// 缓存中的讲解条目
#[derive(Debug, Clone, Deserialize)]
pub struct CachedExplanation {
    pub markdown: String,
    #[serde(default)]
    pub core_concepts: Option<Vec<String>>,
    #[serde(default)]
    pub difficulty: Option<u8>,
    /// 整理流程附带的变式题，原样透传
    #[serde(default)]
    pub variation_problem: Option<String>,
}

/// 讲解缓存查询能力
#[async_trait]
pub trait ExplanationCache: Send + Sync {
    /// 查询摘要键对应的缓存条目，未命中或出错都返回 None
    async fn lookup(&self, key: &str) -> Option<CachedExplanation>;
}

/// HTTP 缓存服务客户端
pub struct HttpExplanationCache {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExplanationCache {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<CachedExplanation>, CacheError> {
        let url = format!(
            "{}/explanations/{}",
            self.base_url.trim_end_matches('/'),
            key
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CacheError::RequestFailed {
                source: Box::new(e),
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(CacheError::BadStatus {
                status: response.status().as_u16(),
            });
        }

        let cached = response
            .json::<CachedExplanation>()
            .await
            .map_err(|e| CacheError::JsonParseFailed {
                source: Box::new(e),
            })?;

        Ok(Some(cached))
    }
}

#[async_trait]
impl ExplanationCache for HttpExplanationCache {
    async fn lookup(&self, key: &str) -> Option<CachedExplanation> {
        match self.fetch(key).await {
            Ok(Some(cached)) => {
                debug!("缓存命中: {}", key);
                Some(cached)
            }
            Ok(None) => None,
            Err(e) => {
                // 缓存故障按未命中处理
                warn!("缓存查询失败，按未命中处理 ({}): {}", key, e);
                None
            }
        }
    }
}

/// 未配置缓存服务时的替身，永远未命中
pub struct NoopExplanationCache;

#[async_trait]
impl ExplanationCache for NoopExplanationCache {
    async fn lookup(&self, _key: &str) -> Option<CachedExplanation> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_hex() {
        let a = content_digest(b"problem image bytes");
        let b = content_digest(b"problem image bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_digest_differs_on_content() {
        assert_ne!(content_digest(b"page one"), content_digest(b"page two"));
    }

    #[tokio::test]
    async fn test_noop_cache_always_misses() {
        let cache = NoopExplanationCache;
        assert!(cache.lookup("abc123").await.is_none());
    }

    #[tokio::test]
    async fn test_http_cache_swallows_connection_errors() {
        // 指向一个没人监听的端口，查询失败必须表现为未命中
        let cache = HttpExplanationCache::new("http://127.0.0.1:9");
        assert!(cache.lookup("deadbeef").await.is_none());
    }

    #[test]
    fn test_cached_explanation_optional_fields() {
        let json = r##"{"markdown": "# 缓存讲解"}"##;
        let cached: CachedExplanation = serde_json::from_str(json).unwrap();
        assert!(cached.core_concepts.is_none());
        assert!(cached.difficulty.is_none());
        assert!(cached.variation_problem.is_none());
    }
}
