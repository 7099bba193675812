/// 跟踪框叠加绘制 (Overlay rendering)
///
/// 每个跟踪框: 按ID着色的矩形框 + "ID:n" 标签 (实心背景, 文字颜色按亮度取黑/白)。
use crate::error::{Error, Result};
use crate::msgs::{BoundingBox, BoundingBoxes, Image};
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 标签字号 (像素)
pub const LABEL_SCALE: f32 = 18.0;

/// 边框线宽 (像素)
pub const BOX_THICKNESS: u32 = 2;

const DARK_TEXT: Rgb<u8> = Rgb([0, 0, 0]);
const LIGHT_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

/// 常见系统字体位置
const FONT_CANDIDATES: &[&str] = &[
    "assets/font/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// 根据ID生成颜色 (同一ID始终得到同一颜色)
pub fn id_color(id: i64) -> Rgb<u8> {
    let idx = id.wrapping_add(3);
    let channel = |k: i64| idx.wrapping_mul(k).rem_euclid(255) as u8;
    Rgb([channel(29), channel(17), channel(37)])
}

/// 加权亮度 ×100 (0.30 R + 0.59 G + 0.11 B), 整数运算避免浮点边界误差
pub fn weighted_luminance_x100(color: Rgb<u8>) -> u32 {
    let [r, g, b] = color.0;
    30 * r as u32 + 59 * g as u32 + 11 * b as u32
}

/// 标签文字颜色: 亮度 > 127 用黑字, 否则用白字
pub fn text_color(background: Rgb<u8>) -> Rgb<u8> {
    if weighted_luminance_x100(background) > 127 * 100 {
        DARK_TEXT
    } else {
        LIGHT_TEXT
    }
}

pub fn label_text(id: i64) -> String {
    format!("ID:{}", id)
}

/// 把图像消息解码为RGB帧 (复制数据, 不修改原消息)
pub fn image_to_rgb(msg: &Image) -> Result<RgbImage> {
    let channels = match msg.encoding.as_str() {
        "rgb8" | "bgr8" => 3,
        "rgba8" | "bgra8" => 4,
        "mono8" | "8UC1" => 1,
        other => return Err(Error::UnsupportedEncoding(other.to_string())),
    };

    let width = msg.width as usize;
    let height = msg.height as usize;
    let step = if msg.step == 0 {
        width * channels
    } else {
        msg.step as usize
    };
    if step < width * channels {
        return Err(Error::ImageSize {
            expected: width * channels,
            actual: step,
        });
    }
    let expected = if height == 0 { 0 } else { step * (height - 1) + width * channels };
    if msg.data.len() < expected {
        return Err(Error::ImageSize {
            expected,
            actual: msg.data.len(),
        });
    }

    let mut rgb = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        let line = &msg.data[row * step..row * step + width * channels];
        for px in line.chunks_exact(channels) {
            let pixel = match msg.encoding.as_str() {
                "rgb8" | "rgba8" => [px[0], px[1], px[2]],
                "bgr8" | "bgra8" => [px[2], px[1], px[0]],
                _ => [px[0], px[0], px[0]],
            };
            rgb.extend_from_slice(&pixel);
        }
    }

    RgbImage::from_raw(msg.width, msg.height, rgb).ok_or(Error::ImageSize {
        expected: width * height * 3,
        actual: 0,
    })
}

/// 叠加绘制器
pub struct Overlay {
    font: Option<FontArc>,
    scale: PxScale,
}

impl Overlay {
    pub fn new(font: Option<FontArc>) -> Self {
        Self {
            font,
            scale: PxScale::from(LABEL_SCALE),
        }
    }

    /// Loads the label font from `path`, or from the first system font found.
    pub fn with_font_search(path: Option<&Path>) -> Result<Self> {
        let font_path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => FONT_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists()),
        };

        let Some(font_path) = font_path else {
            warn!("⚠️  未找到标签字体, 只绘制标签背景");
            return Ok(Self::new(None));
        };

        let bytes = std::fs::read(&font_path)?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| Error::InvalidParameter {
            name: "font_path",
            reason: format!("{}: {}", font_path.display(), e),
        })?;
        info!("✅ 标签字体加载成功: {}", font_path.display());
        Ok(Self::new(Some(font)))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 标签尺寸 (宽, 高)
    fn label_size(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(font) => text_size(self.scale, font, text),
            // 无字体时按字号估算
            None => (
                (self.scale.x * 0.55 * text.chars().count() as f32).ceil() as u32,
                self.scale.y.ceil() as u32,
            ),
        }
    }

    /// 绘制单个跟踪框
    pub fn draw_object(&self, frame: &mut RgbImage, bbox: &BoundingBox) {
        let (fw, fh) = (frame.width() as i64, frame.height() as i64);
        // 完全在画面外的框不绘制
        if bbox.xmin >= fw || bbox.ymin >= fh || bbox.xmax < 0 || bbox.ymax < 0 {
            return;
        }

        // 坐标裁剪到画面外留一圈边距, 画面外的边仍落在画面外
        let margin = BOX_THICKNESS as i64 + 1;
        let clip_x = |v: i64| v.clamp(-margin, fw + margin);
        let clip_y = |v: i64| v.clamp(-margin, fh + margin);
        let (xmin, xmax) = (clip_x(bbox.xmin), clip_x(bbox.xmax));
        let (ymin, ymax) = (clip_y(bbox.ymin), clip_y(bbox.ymax));

        let color = id_color(bbox.id);
        let x = xmin as i32;
        let y = ymin as i32;
        let w = (xmax - xmin).max(1) as u32;
        let h = (ymax - ymin).max(1) as u32;

        // 边框
        for inset in 0..BOX_THICKNESS {
            let (iw, ih) = (w.saturating_sub(2 * inset), h.saturating_sub(2 * inset));
            if iw == 0 || ih == 0 {
                break;
            }
            let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(iw, ih);
            draw_hollow_rect_mut(frame, rect, color);
        }

        // 标签 (紧贴框的左上角上方)
        let text = label_text(bbox.id);
        let (tw, th) = self.label_size(&text);
        let label_y = y.saturating_sub(th as i32);
        let background = Rect::at(x, label_y).of_size(tw.max(1), th.max(1));
        draw_filled_rect_mut(frame, background, color);

        if let Some(font) = &self.font {
            draw_text_mut(frame, text_color(color), x, label_y, self.scale, font, &text);
        }
    }

    /// 复制图像并绘制一批跟踪框
    pub fn render(&self, image: &Image, tracks: &BoundingBoxes) -> Result<RgbImage> {
        let mut frame = image_to_rgb(image)?;
        for bbox in &tracks.bounding_boxes {
            self.draw_object(&mut frame, bbox);
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgs::{Header, Time};

    fn blank(width: u32, height: u32) -> Image {
        Image::from_rgb(Header::new(Time::new(1, 0), "camera"), &RgbImage::new(width, height))
    }

    #[test]
    fn test_label_text() {
        assert_eq!(label_text(1), "ID:1");
        assert_eq!(label_text(42), "ID:42");
        assert_eq!(label_text(-3), "ID:-3");
    }

    #[test]
    fn test_id_color_is_pure() {
        // idx = 4: R = 116, G = 68, B = 148
        assert_eq!(id_color(1), Rgb([116, 68, 148]));
        for id in [0, 1, 7, 1000, -5] {
            assert_eq!(id_color(id), id_color(id));
        }
        assert_ne!(id_color(1), id_color(2));
    }

    #[test]
    fn test_luminance_boundary() {
        let at_threshold = Rgb([127, 127, 127]);
        assert_eq!(weighted_luminance_x100(at_threshold), 12700);
        assert_eq!(text_color(at_threshold), LIGHT_TEXT);

        let above = Rgb([128, 127, 127]);
        assert_eq!(weighted_luminance_x100(above), 12730);
        assert_eq!(text_color(above), DARK_TEXT);

        assert_eq!(text_color(Rgb([255, 255, 255])), DARK_TEXT);
        assert_eq!(text_color(Rgb([0, 0, 0])), LIGHT_TEXT);
    }

    #[test]
    fn test_bgr_and_mono_conversion() {
        let bgr = Image {
            width: 2,
            height: 1,
            encoding: "bgr8".to_string(),
            step: 6,
            data: vec![1, 2, 3, 4, 5, 6],
            ..Default::default()
        };
        let rgb = image_to_rgb(&bgr).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([3, 2, 1]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([6, 5, 4]));

        let mono = Image {
            width: 1,
            height: 2,
            encoding: "mono8".to_string(),
            step: 4, // 行尾有填充
            data: vec![9, 0, 0, 0, 7],
            ..Default::default()
        };
        let rgb = image_to_rgb(&mono).unwrap();
        assert_eq!(rgb.get_pixel(0, 1), &Rgb([7, 7, 7]));
    }

    #[test]
    fn test_conversion_failures() {
        let mut msg = blank(4, 4);
        msg.encoding = "yuv422".to_string();
        assert!(matches!(image_to_rgb(&msg), Err(Error::UnsupportedEncoding(_))));

        let mut msg = blank(4, 4);
        msg.data.truncate(10);
        assert!(matches!(image_to_rgb(&msg), Err(Error::ImageSize { .. })));
    }

    #[test]
    fn test_render_draws_box_and_label_background() {
        let overlay = Overlay::new(None);
        let image = blank(100, 100);
        let tracks = BoundingBoxes::new(
            Time::new(1, 0),
            vec![BoundingBox::new(20, 40, 60, 80, 0.9).with_id(1)],
        );
        let frame = overlay.render(&image, &tracks).unwrap();
        let color = id_color(1);

        // 边框两像素宽
        assert_eq!(frame.get_pixel(20, 60), &color);
        assert_eq!(frame.get_pixel(21, 60), &color);
        assert_eq!(frame.get_pixel(40, 60), &Rgb([0, 0, 0]));
        // 标签背景在框上方
        assert_eq!(frame.get_pixel(22, 30), &color);
        // 原图不被修改
        assert!(image.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_render_skips_boxes_far_outside_frame() {
        let overlay = Overlay::new(None);
        let tracks = BoundingBoxes::new(
            Time::new(1, 0),
            vec![
                BoundingBox::new(3_000_000_000, 10, 3_000_000_100, 20, 0.9).with_id(2),
                BoundingBox::new(i64::MIN, i64::MIN, i64::MIN + 10, i64::MIN + 10, 0.9).with_id(3),
            ],
        );
        let frame = overlay.render(&blank(32, 32), &tracks).unwrap();
        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_render_huge_box_keeps_visible_edges() {
        let overlay = Overlay::new(None);
        let tracks = BoundingBoxes::new(
            Time::new(1, 0),
            vec![BoundingBox::new(-3_000_000_000, 5, 3_000_000_000, 20, 0.9).with_id(4)],
        );
        let frame = overlay.render(&blank(32, 32), &tracks).unwrap();
        let color = id_color(4);
        // 上下边可见, 左右边在画面外
        assert_eq!(frame.get_pixel(16, 5), &color);
        assert_eq!(frame.get_pixel(16, 19), &color);
        assert_eq!(frame.get_pixel(0, 12), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_render_clips_boxes_outside_frame() {
        let overlay = Overlay::new(None);
        let tracks = BoundingBoxes::new(
            Time::new(1, 0),
            vec![BoundingBox::new(-50, -50, 500, 500, 0.5).with_id(9)],
        );
        assert!(overlay.render(&blank(32, 32), &tracks).is_ok());
    }
}
