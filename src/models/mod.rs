pub mod explanation;
pub mod loaders;
pub mod problem;

pub use explanation::{Explanation, ExplanationMode, GenerationOptions, GENERATION_FAILED_MESSAGE};
pub use loaders::load_guidelines;
pub use problem::{BBox, DetectedProblem, InputFile, PageImage, ProblemType};
