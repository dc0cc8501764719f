pub mod cache_service;
pub mod detection_service;
pub mod failure_logger;
pub mod generation_service;
pub mod page_extractor;

pub use cache_service::{
    content_digest, CachedExplanation, ExplanationCache, HttpExplanationCache,
    NoopExplanationCache,
};
pub use detection_service::{LlmDetector, ProblemDetector};
pub use failure_logger::{FailureLog, FailureWriter};
pub use generation_service::{
    is_refusal_response, ExplanationGenerator, GeneratedExplanation, GenerationRequest,
    LlmGenerator,
};
pub use page_extractor::{sniff_kind, PageExtractor, SniffedKind};
