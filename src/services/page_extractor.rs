//! 页面提取服务 - 业务能力层
//!
//! 把一个输入文件变成一列单页图像。文件类型只认字节前缀魔数，
//! 不看扩展名：整册文档逐页独立渲染，单页渲染失败跳过该页继续；
//! 整册打开失败则把整个文件当作单张图片解码。本层不做重试。

use crate::error::ExtractError;
use crate::models::{InputFile, PageImage};
use crate::workflow::ProgressSink;
use image::RgbImage;
use pdfium_render::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 魔数嗅探结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffedKind {
    /// 整册分页文档
    PaginatedDocument,
    /// 单张位图
    RasterImage,
    /// 无法识别，按单张位图尝试解码
    Unknown,
}

/// 按固定魔数前缀判断文件类型
pub fn sniff_kind(bytes: &[u8]) -> SniffedKind {
    if bytes.starts_with(b"%PDF-") {
        return SniffedKind::PaginatedDocument;
    }
    let is_image = bytes.starts_with(&[0x89, b'P', b'N', b'G'])
        || bytes.starts_with(&[0xFF, 0xD8, 0xFF])
        || bytes.starts_with(b"GIF8")
        || bytes.starts_with(b"BM")
        || (bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP")
        || bytes.starts_with(&[0x49, 0x49, 0x2A, 0x00])
        || bytes.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]);
    if is_image {
        SniffedKind::RasterImage
    } else {
        SniffedKind::Unknown
    }
}

/// 页面提取服务
///
/// 职责：
/// - 嗅探输入文件类型并产出 PageImage 序列
/// - 单页失败只跳过该页
/// - 不出现 Vec<InputFile>，一次只处理一个文件
pub struct PageExtractor {
    render_page_width: u32,
}

impl PageExtractor {
    pub fn new(render_page_width: u32) -> Self {
        Self {
            render_page_width: render_page_width.max(1),
        }
    }

    /// 提取一个文件的全部页面
    ///
    /// # 参数
    /// - `file`: 输入文件
    /// - `first_page_number`: 本文件第一页的页码（跨文件连续）
    /// - `sink`: 进度接收端，每页渲染前后各推送一条状态
    /// - `cancel`: 取消信号，在每页边界检查
    pub fn extract(
        &self,
        file: &InputFile,
        first_page_number: u32,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageImage>, ExtractError> {
        if file.bytes.is_empty() {
            return Err(ExtractError::EmptyFile {
                name: file.name.clone(),
            });
        }

        match sniff_kind(&file.bytes) {
            SniffedKind::PaginatedDocument => {
                match self.render_document(file, first_page_number, sink, cancel) {
                    Ok(pages) => Ok(pages),
                    Err(e) => {
                        // 整册打开失败时退回按单张图片处理
                        warn!("整册文档打开失败，改按单张图片处理 ({}): {}", file.name, e);
                        self.decode_single_image(file, first_page_number)
                    }
                }
            }
            SniffedKind::RasterImage | SniffedKind::Unknown => {
                self.decode_single_image(file, first_page_number)
            }
        }
    }

    /// 逐页渲染整册文档
    fn render_document(
        &self,
        file: &InputFile,
        first_page_number: u32,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<Vec<PageImage>, ExtractError> {
        let bindings =
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
                .map_err(ExtractError::document_open_failed)?;
        let pdfium = Pdfium::new(bindings);

        let document = pdfium
            .load_pdf_from_byte_slice(&file.bytes, None)
            .map_err(ExtractError::document_open_failed)?;

        let total = document.pages().len() as usize;
        info!("📄 文件 {} 共 {} 页", file.name, total);

        let mut pages = Vec::with_capacity(total);
        for (idx, page) in document.pages().iter().enumerate() {
            if cancel.is_cancelled() {
                info!("🛑 页面渲染在第 {}/{} 页前被取消", idx + 1, total);
                break;
            }

            let page_number = first_page_number + idx as u32;
            sink.push_status(&format!("正在渲染第 {}/{} 页…", idx + 1, total));

            match self.render_page(&page, page_number) {
                Ok(image) => {
                    sink.push_status(&format!("第 {}/{} 页渲染完成", idx + 1, total));
                    pages.push(PageImage { image, page_number });
                }
                Err(e) => {
                    // 单页失败不致命，跳过继续
                    warn!("{}，已跳过", e);
                    sink.push_status(&format!("第 {}/{} 页渲染失败，已跳过", idx + 1, total));
                }
            }
        }

        Ok(pages)
    }

    /// 渲染单页，按配置宽度等比缩放
    fn render_page(&self, page: &PdfPage, page_number: u32) -> Result<RgbImage, ExtractError> {
        let scale = self.render_page_width as f32 / page.width().value;
        let target_height = (page.height().value * scale).round().max(1.0) as i32;

        let bitmap = page
            .render_with_config(
                &PdfRenderConfig::new()
                    .set_target_width(self.render_page_width as i32)
                    .set_target_height(target_height)
                    .render_form_data(true),
            )
            .map_err(|e| ExtractError::page_render_failed(page_number, e))?;

        Ok(bitmap.as_image().to_rgb8())
    }

    /// 整个文件按单张位图解码
    fn decode_single_image(
        &self,
        file: &InputFile,
        page_number: u32,
    ) -> Result<Vec<PageImage>, ExtractError> {
        let image = image::load_from_memory(&file.bytes)
            .map_err(ExtractError::image_decode_failed)?
            .to_rgb8();

        debug!(
            "🖼️ 文件 {} 按单张图片处理 ({}x{})",
            file.name,
            image.width(),
            image.height()
        );

        Ok(vec![PageImage { image, page_number }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::image::encode_png;
    use crate::workflow::TracingProgressSink;

    fn png_file(name: &str, width: u32, height: u32) -> InputFile {
        let img = RgbImage::from_pixel(width, height, image::Rgb([255, 255, 255]));
        InputFile::new(name, encode_png(&img).unwrap())
    }

    #[test]
    fn test_sniff_paginated_document() {
        assert_eq!(sniff_kind(b"%PDF-1.7 ..."), SniffedKind::PaginatedDocument);
    }

    #[test]
    fn test_sniff_raster_image() {
        assert_eq!(
            sniff_kind(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
            SniffedKind::RasterImage
        );
        assert_eq!(sniff_kind(&[0xFF, 0xD8, 0xFF, 0xE0]), SniffedKind::RasterImage);
        assert_eq!(sniff_kind(b"BM6"), SniffedKind::RasterImage);
    }

    #[test]
    fn test_sniff_unknown() {
        assert_eq!(sniff_kind(b"hello world"), SniffedKind::Unknown);
        assert_eq!(sniff_kind(&[]), SniffedKind::Unknown);
    }

    #[test]
    fn test_extract_single_image() {
        let extractor = PageExtractor::new(1600);
        let sink = TracingProgressSink::default();
        let cancel = CancellationToken::new();

        let pages = extractor
            .extract(&png_file("photo.png", 60, 80), 7, &sink, &cancel)
            .unwrap();

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 7);
        assert_eq!(pages[0].image.dimensions(), (60, 80));
    }

    #[test]
    fn test_extract_empty_file_fails() {
        let extractor = PageExtractor::new(1600);
        let sink = TracingProgressSink::default();
        let cancel = CancellationToken::new();

        let result = extractor.extract(&InputFile::new("empty.bin", vec![]), 1, &sink, &cancel);
        assert!(matches!(result, Err(ExtractError::EmptyFile { .. })));
    }

    #[test]
    fn test_extract_undecodable_file_fails() {
        let extractor = PageExtractor::new(1600);
        let sink = TracingProgressSink::default();
        let cancel = CancellationToken::new();

        let file = InputFile::new("garbage.bin", b"not an image at all".to_vec());
        assert!(extractor.extract(&file, 1, &sink, &cancel).is_err());
    }

    #[test]
    fn test_broken_document_falls_back_then_fails() {
        // 魔数声称是整册文档但内容损坏，回退的单图解码也会失败
        let extractor = PageExtractor::new(1600);
        let sink = TracingProgressSink::default();
        let cancel = CancellationToken::new();

        let file = InputFile::new("broken.pdf", b"%PDF-1.4 truncated".to_vec());
        assert!(extractor.extract(&file, 1, &sink, &cancel).is_err());
    }
}
