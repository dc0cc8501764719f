//! 图片处理辅助函数
//!
//! 流水线内部统一用 RGB 位图，外发时编码为 PNG。缓存键的摘要
//! 输入和发给检测、生成服务的图片都使用这里的编码结果。

use base64::Engine;
use image::RgbImage;
use std::io::Cursor;

/// 将 RGB 位图编码为 PNG 字节
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, image::ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

/// 将 PNG 字节包装为 data URL，供视觉接口使用
pub fn png_data_url(png_bytes: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png_bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_png_roundtrip() {
        let img = RgbImage::from_pixel(4, 3, image::Rgb([200, 10, 30]));
        let bytes = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (4, 3));
    }

    #[test]
    fn test_png_data_url_prefix() {
        assert!(png_data_url(&[1, 2, 3]).starts_with("data:image/png;base64,"));
    }
}
