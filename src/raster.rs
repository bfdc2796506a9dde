//! Rasterizer – paints a staged surface into an opaque bitmap with
//! `tiny-skia`.
//!
//! Paint order per box: background colour, border, content (image or text),
//! then children sorted by `z-index`. `overflow: hidden` clips descendants
//! to the box.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use image::{Rgb, RgbImage, RgbaImage};
use serde::Deserialize;
use tiny_skia::{
    Color, ColorU8, FillRule, FilterQuality, Mask, Paint, PathBuilder, Pattern, Pixmap, Rect,
    SpreadMode, Stroke, Transform,
};

use crate::assets::AssetSet;
use crate::error::{CardError, Result};
use crate::fonts::FontManager;
use crate::layout::{BoxContent, PositionedBox};
use crate::staging::{StagedSurface, SurfaceId, PAGE_HEIGHT_MM, PAGE_WIDTH_MM, SURFACE_HEIGHT_PX, SURFACE_WIDTH_PX};
use crate::style::{ComputedStyle, ObjectFit};

/// Capture settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Device pixels per CSS pixel.
    pub scale: f32,
    /// Source width in CSS px. Pipeline configs must match the staging canvas.
    pub width_px: u32,
    /// Source height in CSS px.
    pub height_px: u32,
    /// Background RGB painted before anything else. Always opaque.
    pub background: [u8; 3],
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            scale: 3.0,
            width_px: SURFACE_WIDTH_PX,
            height_px: SURFACE_HEIGHT_PX,
            background: [255, 255, 255],
        }
    }
}

impl CaptureOptions {
    /// Output bitmap size in device pixels.
    pub fn device_size(&self) -> (u32, u32) {
        (
            (self.width_px as f32 * self.scale).round() as u32,
            (self.height_px as f32 * self.scale).round() as u32,
        )
    }
}

/// A captured page bitmap plus the physical size it represents.
#[derive(Debug, Clone)]
pub struct RasterPage {
    pub image: RgbImage,
    pub width_mm: f32,
    pub height_mm: f32,
}

impl RasterPage {
    pub fn width_px(&self) -> u32 {
        self.image.width()
    }

    pub fn height_px(&self) -> u32 {
        self.image.height()
    }

    /// PNG encoding of the bitmap.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.image
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .map_err(|e| CardError::Capture(format!("PNG encode error: {e}")))?;
        Ok(out)
    }
}

/// Turns a mounted surface into a bitmap.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn capture(&self, surface: &StagedSurface, assets: &AssetSet) -> Result<RasterPage>;
}

/// CPU rasterizer backed by tiny-skia.
pub struct SkiaRasterizer {
    fonts: Arc<FontManager>,
    options: CaptureOptions,
}

impl SkiaRasterizer {
    pub fn new(fonts: Arc<FontManager>, options: CaptureOptions) -> Self {
        Self { fonts, options }
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Paint synchronously.
    pub fn paint(&self, surface: &StagedSurface, assets: &AssetSet) -> Result<RasterPage> {
        paint_surface(&self.fonts, &self.options, surface.id(), surface.boxes(), assets)
    }
}

#[async_trait]
impl Rasterizer for SkiaRasterizer {
    /// Paints on the blocking pool so the executor is not held for the
    /// length of a full-resolution page.
    async fn capture(&self, surface: &StagedSurface, assets: &AssetSet) -> Result<RasterPage> {
        let fonts = self.fonts.clone();
        let options = self.options.clone();
        let id = surface.id();
        let boxes = surface.boxes().to_vec();
        let assets = assets.clone();

        tokio::task::spawn_blocking(move || paint_surface(&fonts, &options, id, &boxes, &assets))
            .await
            .map_err(|e| CardError::Capture(format!("{id}: paint task failed: {e}")))?
    }
}

fn paint_surface(
    fonts: &FontManager,
    opts: &CaptureOptions,
    id: SurfaceId,
    boxes: &[PositionedBox],
    assets: &AssetSet,
) -> Result<RasterPage> {
    if !(opts.scale > 0.0) {
        return Err(CardError::Capture(format!("invalid capture scale {}", opts.scale)));
    }
    let (w, h) = opts.device_size();
    let mut pixmap = Pixmap::new(w, h)
        .ok_or_else(|| CardError::Capture(format!("cannot allocate {w}x{h} bitmap")))?;
    let [r, g, b] = opts.background;
    pixmap.fill(Color::from_rgba8(r, g, b, 255));

    if !fonts.has_real_fonts() {
        log::warn!("No font outlines available; text on {id} is not painted");
    }

    let mut painter = Painter {
        pixmap: &mut pixmap,
        fonts,
        assets,
        scale: opts.scale,
        patterns: HashMap::new(),
    };
    let root_clip = Rect::from_xywh(0.0, 0.0, w as f32, h as f32);
    for b in by_z_index(boxes) {
        painter.paint_box(b, root_clip);
    }

    let mut image = RgbImage::new(w, h);
    for (dst, src) in image.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgb([c.red(), c.green(), c.blue()]);
    }

    log::debug!("Captured {id} at {w}x{h}");
    Ok(RasterPage {
        image,
        width_mm: PAGE_WIDTH_MM,
        height_mm: PAGE_HEIGHT_MM,
    })
}

/// Stable ordering of siblings by `z-index`.
fn by_z_index(boxes: &[PositionedBox]) -> Vec<&PositionedBox> {
    let mut sorted: Vec<&PositionedBox> = boxes.iter().collect();
    sorted.sort_by_key(|b| b.style.z_index);
    sorted
}

struct Painter<'a> {
    pixmap: &'a mut Pixmap,
    fonts: &'a FontManager,
    assets: &'a AssetSet,
    scale: f32,
    /// Decoded assets converted to premultiplied pixmaps, per `src`.
    patterns: HashMap<String, Option<Pixmap>>,
}

impl Painter<'_> {
    /// Device-space rectangle for a box.
    fn device_rect(&self, x: f32, y: f32, w: f32, h: f32) -> Option<Rect> {
        Rect::from_xywh(x * self.scale, y * self.scale, w * self.scale, h * self.scale)
    }

    fn paint_box(&mut self, b: &PositionedBox, clip: Option<Rect>) {
        let Some(clip) = clip else {
            return;
        };
        let bounds = self.device_rect(b.x, b.y, b.width, b.height);

        if let Some(bounds) = bounds {
            if !b.style.background_color.is_transparent() {
                self.fill_solid(bounds, clip, &b.style.background_color);
            }
            if b.style.border_width > 0.0 {
                self.paint_border(bounds, clip, &b.style);
            }
        }

        match &b.content {
            BoxContent::None => {}
            BoxContent::Image { src, .. } => {
                if let Some(bounds) = bounds {
                    self.paint_image(src, bounds, clip, b.style.object_fit);
                }
            }
            BoxContent::Text { lines } => {
                for line in lines {
                    self.paint_text(
                        &line.text,
                        b.x + line.x_offset,
                        b.y + line.y_offset,
                        &b.style,
                        clip,
                    );
                }
            }
        }

        let child_clip = if b.style.overflow_hidden {
            bounds.and_then(|r| intersect(r, clip))
        } else {
            Some(clip)
        };
        for child in by_z_index(&b.children) {
            self.paint_box(child, child_clip);
        }
    }

    fn fill_solid(&mut self, rect: Rect, clip: Rect, color: &crate::style::Color) {
        let Some(rect) = intersect(rect, clip) else {
            return;
        };
        let [r, g, b, a] = color.to_rgba8();
        let mut paint = Paint::default();
        paint.set_color_rgba8(r, g, b, a);
        paint.anti_alias = false;
        self.pixmap.fill_rect(rect, &paint, Transform::identity(), None);
    }

    fn paint_border(&mut self, rect: Rect, clip: Rect, style: &ComputedStyle) {
        let bw = style.border_width * self.scale;
        let (l, t, r, btm) = (rect.left(), rect.top(), rect.right(), rect.bottom());
        let edges = [
            Rect::from_ltrb(l, t, r, t + bw),
            Rect::from_ltrb(l, btm - bw, r, btm),
            Rect::from_ltrb(l, t, l + bw, btm),
            Rect::from_ltrb(r - bw, t, r, btm),
        ];
        for edge in edges.into_iter().flatten() {
            self.fill_solid(edge, clip, &style.border_color);
        }
    }

    fn cache_pattern(&mut self, src: &str) {
        if !self.patterns.contains_key(src) {
            let converted = self.assets.image(src).and_then(pixmap_from_rgba);
            self.patterns.insert(src.to_string(), converted);
        }
    }

    fn paint_image(&mut self, src: &str, bounds: Rect, clip: Rect, fit: ObjectFit) {
        let Some(visible) = intersect(bounds, clip) else {
            return;
        };
        self.cache_pattern(src);
        let Some(source) = self.patterns.get(src).and_then(Option::as_ref) else {
            // Unavailable asset: leave the region as painted so far.
            return;
        };
        let (iw, ih) = (source.width() as f32, source.height() as f32);
        let (bw, bh) = (bounds.width(), bounds.height());

        let (sx, sy) = match fit {
            ObjectFit::Fill => (bw / iw, bh / ih),
            ObjectFit::Cover => {
                let s = (bw / iw).max(bh / ih);
                (s, s)
            }
            ObjectFit::Contain => {
                let s = (bw / iw).min(bh / ih);
                (s, s)
            }
        };
        let (dw, dh) = (iw * sx, ih * sy);
        let ox = bounds.left() + (bw - dw) / 2.0;
        let oy = bounds.top() + (bh - dh) / 2.0;

        let Some(drawn) = Rect::from_xywh(ox, oy, dw, dh).and_then(|r| intersect(r, visible)) else {
            return;
        };

        let mut paint = Paint::default();
        paint.shader = Pattern::new(
            source.as_ref(),
            SpreadMode::Pad,
            FilterQuality::Bicubic,
            1.0,
            Transform::from_row(sx, 0.0, 0.0, sy, ox, oy),
        );
        paint.anti_alias = false;
        self.pixmap.fill_rect(drawn, &paint, Transform::identity(), None);
    }

    fn paint_text(&mut self, text: &str, x: f32, top: f32, style: &ComputedStyle, clip: Rect) {
        let bold = style.is_bold();
        let family = &style.font_family;
        let line_height = self.fonts.line_height_px(style.font_size, style.line_height);
        let baseline = top + self.fonts.baseline_offset_px(style.font_size, line_height, bold, family);

        let Some(path) = self
            .fonts
            .outline_text(text, style.font_size, bold, family, x, baseline)
        else {
            return;
        };

        let [r, g, b, a] = style.color.to_rgba8();
        let mut paint = Paint::default();
        paint.set_color_rgba8(r, g, b, a);
        paint.anti_alias = true;

        let ts = Transform::from_scale(self.scale, self.scale);
        let mask = self.clip_mask(clip);
        self.pixmap
            .fill_path(&path, &paint, FillRule::Winding, ts, mask.as_ref());

        if self.fonts.needs_faux_bold(family, bold) {
            let stroke = Stroke {
                width: style.font_size * 0.04,
                ..Stroke::default()
            };
            self.pixmap.stroke_path(&path, &paint, &stroke, ts, mask.as_ref());
        }
    }

    /// A mask limiting painting to `clip`; `None` when the clip covers the
    /// whole bitmap.
    fn clip_mask(&self, clip: Rect) -> Option<Mask> {
        let (w, h) = (self.pixmap.width() as f32, self.pixmap.height() as f32);
        if clip.left() <= 0.0 && clip.top() <= 0.0 && clip.right() >= w && clip.bottom() >= h {
            return None;
        }
        let mut mask = Mask::new(self.pixmap.width(), self.pixmap.height())?;
        mask.fill_path(
            &PathBuilder::from_rect(clip),
            FillRule::Winding,
            false,
            Transform::identity(),
        );
        Some(mask)
    }
}

fn intersect(a: Rect, b: Rect) -> Option<Rect> {
    Rect::from_ltrb(
        a.left().max(b.left()),
        a.top().max(b.top()),
        a.right().min(b.right()),
        a.bottom().min(b.bottom()),
    )
}

fn pixmap_from_rgba(img: &RgbaImage) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(img.width(), img.height())?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(img.pixels()) {
        let [r, g, b, a] = src.0;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Some(pixmap)
}
