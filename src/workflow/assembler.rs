//! 编号装配 - 流程层
//!
//! 核心职责：把检测出的题目候选变成有序、编号唯一的讲解草稿
//!
//! 规则顺序：
//! 1. 按 (页码, 包围盒上沿) 升序排列，即物理阅读顺序
//! 2. 解析题号：先看检测服务报的编号字段，再看题干开头；
//!    都解析不出来的按物理顺序领取哨兵号 1000+k
//! 3. 按最终题号升序重排，这是展示和进度消息使用的顺序
//! 4. 裁剪题目区域作为记录的题图，单条裁剪失败不影响其余记录

use crate::error::ExtractError;
use crate::models::{BBox, DetectedProblem, Explanation, PageImage};
use crate::utils::image::encode_png;
use image::imageops;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error};

/// 裁剪时在包围盒四周追加的源图像素边距
const CROP_PADDING_PX: u32 = 12;

/// 哨兵号起点，未标号的题排到所有有标号的题之后
const SENTINEL_BASE: u32 = 1000;

/// 把检测结果装配为讲解草稿列表
///
/// 输入是 (页码, 候选) 对，页码必须能在 `pages` 里找到对应页。
/// 输出按最终题号升序。纯同步，不做任何外部调用。
pub fn assemble(pages: &[PageImage], mut detected: Vec<(u32, DetectedProblem)>) -> Vec<Explanation> {
    let page_index: HashMap<u32, &PageImage> =
        pages.iter().map(|p| (p.page_number, p)).collect();

    // 物理阅读顺序：页码优先，同页按上沿位置
    detected.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.bbox.y_min.total_cmp(&b.1.bbox.y_min))
    });

    let mut used_numbers: HashSet<u32> = HashSet::new();
    let mut unlabeled_count: u32 = 0;
    let mut drafts = Vec::with_capacity(detected.len());

    for (page_number, problem) in detected {
        let parsed = parse_problem_number(problem.number_label.as_deref(), &problem.body)
            .filter(|n| !used_numbers.contains(n));

        // 重复题号视同无法解析，唯一性优先
        let problem_number = match parsed {
            Some(n) => n,
            None => {
                // 哨兵号通常是 1000+k，若与显式标出的大题号撞上则继续顺延
                let mut sentinel = SENTINEL_BASE + unlabeled_count;
                unlabeled_count += 1;
                while used_numbers.contains(&sentinel) {
                    sentinel = SENTINEL_BASE + unlabeled_count;
                    unlabeled_count += 1;
                }
                sentinel
            }
        };
        used_numbers.insert(problem_number);

        let Some(page) = page_index.get(&page_number) else {
            error!("第 {} 页的检测结果找不到对应页面，丢弃该题", page_number);
            continue;
        };

        let problem_image = match crop_problem(page, &problem.bbox) {
            Ok(png) => png,
            Err(e) => {
                // 单条裁剪失败不影响其余记录
                error!("题 {} 裁剪失败，丢弃该题: {}", problem_number, e);
                continue;
            }
        };

        let original_text = match &problem.choices {
            Some(choices) if !choices.trim().is_empty() => {
                format!("{}\n选项：{}", problem.body, choices)
            }
            _ => problem.body.clone(),
        };

        drafts.push(Explanation::draft(
            page_number,
            problem_number,
            problem_image,
            original_text,
        ));
    }

    // 最终展示顺序
    drafts.sort_by_key(|d| d.problem_number);

    debug!(
        "装配完成: {} 条草稿，其中 {} 条使用哨兵号",
        drafts.len(),
        unlabeled_count
    );

    drafts
}

/// 解析题号，编号字段优先，其次题干开头
pub fn parse_problem_number(label: Option<&str>, body: &str) -> Option<u32> {
    label
        .and_then(parse_label_text)
        .or_else(|| parse_label_text(body))
}

/// 从一段文本开头解析 1 到 4 位的题号
///
/// 认两种写法：数字后跟句点类分隔符或"题/号"字样，以及括号
/// 包起来的数字。
fn parse_label_text(text: &str) -> Option<u32> {
    let marker = Regex::new(r"^\s*(\d{1,4})\s*(?:[.．。、:：]|题|号|number)").ok()?;
    if let Some(captures) = marker.captures(text) {
        return captures[1].parse().ok();
    }

    let bracketed = Regex::new(r"^\s*[\(\[（【]\s*(\d{1,4})\s*[\)\]）】]").ok()?;
    bracketed
        .captures(text)
        .and_then(|captures| captures[1].parse().ok())
}

/// 裁剪题目区域并编码为 PNG
///
/// 包围盒换算到源图像素后四周加固定边距，再收束进图像边界。
/// 零面积框退化为 1×1 的占位图，不报错。
fn crop_problem(page: &PageImage, bbox: &BBox) -> Result<Vec<u8>, ExtractError> {
    let bbox = bbox.clamped();
    let (width, height) = page.image.dimensions();
    if width == 0 || height == 0 {
        return Err(ExtractError::CropFailed {
            page: page.page_number,
            detail: "页面图像为空".to_string(),
        });
    }

    let x0 = ((bbox.x_min * width as f32) as i64 - CROP_PADDING_PX as i64)
        .clamp(0, width as i64 - 1) as u32;
    let y0 = ((bbox.y_min * height as f32) as i64 - CROP_PADDING_PX as i64)
        .clamp(0, height as i64 - 1) as u32;
    let x1 = ((bbox.x_max * width as f32).ceil() as i64 + CROP_PADDING_PX as i64)
        .clamp(0, width as i64) as u32;
    let y1 = ((bbox.y_max * height as f32).ceil() as i64 + CROP_PADDING_PX as i64)
        .clamp(0, height as i64) as u32;

    let crop_width = (x1.saturating_sub(x0)).max(1);
    let crop_height = (y1.saturating_sub(y0)).max(1);

    let cropped = imageops::crop_imm(&page.image, x0, y0, crop_width, crop_height).to_image();
    encode_png(&cropped).map_err(|e| ExtractError::CropFailed {
        page: page.page_number,
        detail: e.to_string(),
    })
}
