use image::RgbImage;
use serde::{Deserialize, Serialize};

/// 待分析的输入文件（原始字节，类型靠魔数嗅探判断）
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// 单页图像
///
/// 由页面提取器产出，页码从 1 开始，跨多个输入文件连续编号。
#[derive(Debug, Clone)]
pub struct PageImage {
    pub image: RgbImage,
    pub page_number: u32,
}

/// 归一化包围盒，坐标取值范围 [0,1]，相对页面宽高
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// 将坐标收束到 [0,1]，并保证 min ≤ max
    ///
    /// 检测服务返回的坐标可能越界或颠倒，收束后的零面积框是
    /// 合法输入，裁剪时会退化为 1×1 的占位图。
    pub fn clamped(self) -> Self {
        let mut x_min = self.x_min.clamp(0.0, 1.0);
        let mut x_max = self.x_max.clamp(0.0, 1.0);
        let mut y_min = self.y_min.clamp(0.0, 1.0);
        let mut y_max = self.y_max.clamp(0.0, 1.0);
        if x_min > x_max {
            std::mem::swap(&mut x_min, &mut x_max);
        }
        if y_min > y_max {
            std::mem::swap(&mut y_min, &mut y_max);
        }
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// 收束后是否为零面积框
    pub fn is_degenerate(&self) -> bool {
        self.x_min >= self.x_max || self.y_min >= self.y_max
    }
}

/// 题目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemType {
    /// 选择题
    #[serde(alias = "multiple-choice", alias = "choice")]
    MultipleChoice,
    /// 解答题
    #[serde(alias = "free-response", alias = "subjective")]
    FreeResponse,
}

/// 检测服务返回的单个题目候选
///
/// 字段尽量宽松反序列化，检测服务偶尔会省略可选字段或换别名。
#[derive(Debug, Clone, Deserialize)]
pub struct DetectedProblem {
    pub bbox: BBox,
    #[serde(default = "default_problem_type", alias = "type")]
    pub problem_type: ProblemType,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub choices: Option<String>,
    #[serde(default, alias = "label", alias = "number")]
    pub number_label: Option<String>,
}

fn default_problem_type() -> ProblemType {
    ProblemType::FreeResponse
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_clamp_out_of_range() {
        let clamped = BBox::new(-0.5, 1.7, 0.4, -0.2).clamped();
        assert!(clamped.x_min >= 0.0 && clamped.x_min <= clamped.x_max && clamped.x_max <= 1.0);
        assert!(clamped.y_min >= 0.0 && clamped.y_min <= clamped.y_max && clamped.y_max <= 1.0);
    }

    #[test]
    fn test_bbox_clamp_inverted() {
        let clamped = BBox::new(0.8, 0.9, 0.2, 0.1).clamped();
        assert_eq!(clamped.x_min, 0.2);
        assert_eq!(clamped.x_max, 0.8);
        assert_eq!(clamped.y_min, 0.1);
        assert_eq!(clamped.y_max, 0.9);
    }

    #[test]
    fn test_bbox_degenerate_is_valid() {
        let clamped = BBox::new(0.5, 0.5, 0.5, 0.5).clamped();
        assert!(clamped.is_degenerate());
        assert!(clamped.x_min <= clamped.x_max);
    }

    #[test]
    fn test_detected_problem_lenient_deserialize() {
        let json = r#"{
            "bbox": {"x_min": 0.1, "y_min": 0.2, "x_max": 0.9, "y_max": 0.4},
            "type": "multiple-choice",
            "body": "下列说法正确的是",
            "label": "3."
        }"#;
        let problem: DetectedProblem = serde_json::from_str(json).unwrap();
        assert_eq!(problem.problem_type, ProblemType::MultipleChoice);
        assert_eq!(problem.number_label.as_deref(), Some("3."));
        assert!(problem.choices.is_none());
    }
}
