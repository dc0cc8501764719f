//! 流程层（Workflow Layer）
//!
//! 定义"一批检测结果如何变成讲解记录"的纯流程与进度契约：
//!
//! - `assembler` - 编号装配：排序、题号解析、裁剪
//! - `progress` - 进度回调契约与默认实现

pub mod assembler;
pub mod progress;

pub use assembler::{assemble, parse_problem_number};
pub use progress::{ProgressSink, TracingProgressSink};
