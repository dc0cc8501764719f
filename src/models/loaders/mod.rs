pub mod guideline_loader;

pub use guideline_loader::load_guidelines;
