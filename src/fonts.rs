//! Font loading, text measurement and glyph outlines.
//!
//! Real TrueType/OpenType faces are shaped with `rustybuzz` and outlined with
//! `ttf-parser`. Without a real face the manager falls back to synthetic
//! Helvetica-like metrics: layout still works, but there are no outlines to
//! paint.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tiny_skia::{Path as SkPath, PathBuilder};

use crate::error::{CardError, Result};

/// Family under which discovered or configured faces are registered.
pub const DEFAULT_FAMILY: &str = "sans-serif";

/// Well-known locations for a regular/bold sans-serif pair.
const SYSTEM_FONT_CANDIDATES: &[(&str, &str)] = &[
    (
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    ),
    (
        "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        "/usr/share/fonts/truetype/liberation/LiberationSans-Bold.ttf",
    ),
    (
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    ),
    ("/Library/Fonts/Arial.ttf", "/Library/Fonts/Arial Bold.ttf"),
    ("C:\\Windows\\Fonts\\arial.ttf", "C:\\Windows\\Fonts\\arialbd.ttf"),
];

/// A loaded font face with metrics.
#[derive(Clone)]
pub struct FontData {
    /// Raw font bytes; empty for synthetic faces.
    pub bytes: Vec<u8>,
    pub units_per_em: f32,
    pub ascender: f32,
    pub descender: f32,
    pub line_gap: f32,
}

impl FontData {
    fn synthetic() -> Self {
        Self {
            bytes: Vec::new(),
            units_per_em: 1000.0,
            ascender: 750.0,
            descender: -250.0,
            line_gap: 0.0,
        }
    }

    fn is_synthetic(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct FontKey {
    pub family: String,
    pub bold: bool,
}

impl FontKey {
    fn new(family: &str, bold: bool) -> Self {
        Self {
            family: family.to_string(),
            bold,
        }
    }
}

/// Manages loaded fonts.
pub struct FontManager {
    fonts: HashMap<FontKey, FontData>,
    default_key: FontKey,
}

/// One positioned glyph of a shaped run, in font units.
struct ShapedGlyph {
    id: u16,
    x_advance: f32,
    x_offset: f32,
    y_offset: f32,
}

impl FontManager {
    pub fn new() -> Self {
        Self {
            fonts: HashMap::new(),
            default_key: FontKey::new(DEFAULT_FAMILY, false),
        }
    }

    /// Load a TTF/OTF face from bytes.
    pub fn load_font(&mut self, family: &str, bold: bool, bytes: Vec<u8>) -> Result<()> {
        let face = ttf_parser::Face::parse(&bytes, 0)
            .map_err(|e| CardError::Config(format!("failed to parse font: {e}")))?;

        let data = FontData {
            units_per_em: face.units_per_em() as f32,
            ascender: face.ascender() as f32,
            descender: face.descender() as f32,
            line_gap: face.line_gap() as f32,
            bytes,
        };

        let key = FontKey::new(family, bold);
        if !bold && self.fonts.get(&self.default_key).map_or(true, FontData::is_synthetic) {
            self.default_key = key.clone();
        }
        self.fonts.insert(key, data);
        Ok(())
    }

    pub fn load_font_file(&mut self, family: &str, bold: bool, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        self.load_font(family, bold, bytes)?;
        log::debug!("Loaded font {} (bold: {bold})", path.display());
        Ok(())
    }

    /// Build a manager from explicit font files, falling back to a system
    /// font pair and finally to synthetic metrics.
    pub fn with_fonts(regular: Option<&Path>, bold: Option<&Path>) -> Self {
        let mut mgr = Self::new();

        let (regular, bold): (Option<PathBuf>, Option<PathBuf>) = match regular {
            Some(r) => (Some(r.to_path_buf()), bold.map(Path::to_path_buf)),
            None => match system_font_pair() {
                Some((r, b)) => (Some(r), bold.map(Path::to_path_buf).or(b)),
                None => (None, bold.map(Path::to_path_buf)),
            },
        };

        if let Some(path) = regular {
            if let Err(e) = mgr.load_font_file(DEFAULT_FAMILY, false, &path) {
                log::warn!("Could not load font '{}': {e}", path.display());
            }
        }
        if let Some(path) = bold {
            if let Err(e) = mgr.load_font_file(DEFAULT_FAMILY, true, &path) {
                log::warn!("Could not load bold font '{}': {e}", path.display());
            }
        }

        mgr.ensure_default();
        if !mgr.has_real_fonts() {
            log::warn!("No usable font found; text will be laid out but not painted");
        }
        mgr
    }

    /// Register synthetic Helvetica-like metrics when no face is loaded.
    pub fn ensure_default(&mut self) {
        self.fonts
            .entry(FontKey::new(DEFAULT_FAMILY, false))
            .or_insert_with(FontData::synthetic);
        if !self.fonts.contains_key(&self.default_key) {
            self.default_key = FontKey::new(DEFAULT_FAMILY, false);
        }
    }

    /// Font data for a family/weight: exact match, then the default family
    /// at the same weight, then the default face.
    pub fn get(&self, family: &str, bold: bool) -> Option<&FontData> {
        self.fonts
            .get(&FontKey::new(family, bold))
            .or_else(|| self.fonts.get(&FontKey::new(&self.default_key.family, bold)))
            .or_else(|| self.fonts.get(&self.default_key))
    }

    /// Whether painting `bold` text uses a faux weight (no bold face loaded).
    pub fn needs_faux_bold(&self, family: &str, bold: bool) -> bool {
        bold
            && !self.fonts.contains_key(&FontKey::new(family, true))
            && !self
                .fonts
                .contains_key(&FontKey::new(&self.default_key.family, true))
    }

    /// Width of a string in px.
    pub fn measure_text_width(&self, text: &str, font_size: f32, bold: bool, family: &str) -> f32 {
        let Some(data) = self.get(family, bold) else {
            return heuristic_width(text, font_size, bold);
        };
        match shape(data, text) {
            Some(glyphs) => {
                let scale = font_size / data.units_per_em;
                glyphs.iter().map(|g| g.x_advance * scale).sum()
            }
            None => heuristic_width(text, font_size, bold),
        }
    }

    pub fn line_height_px(&self, font_size: f32, line_height_factor: f32) -> f32 {
        font_size * line_height_factor
    }

    /// Distance from the top of a line box to the baseline, in px.
    pub fn baseline_offset_px(&self, font_size: f32, line_height: f32, bold: bool, family: &str) -> f32 {
        let (ascender, descender, upm) = match self.get(family, bold) {
            Some(d) => (d.ascender, d.descender, d.units_per_em),
            None => (750.0, -250.0, 1000.0),
        };
        let scale = font_size / upm;
        let content = (ascender - descender) * scale;
        let half_leading = (line_height - content) / 2.0;
        half_leading + ascender * scale
    }

    /// Check if real font bytes are loaded for the default face.
    pub fn has_real_fonts(&self) -> bool {
        self.fonts
            .get(&self.default_key)
            .map(|d| !d.is_synthetic())
            .unwrap_or(false)
    }

    /// Outline `text` into a single path in px coordinates, starting at
    /// `(x, baseline)`. `None` for synthetic faces or whitespace-only runs.
    pub fn outline_text(
        &self,
        text: &str,
        font_size: f32,
        bold: bool,
        family: &str,
        x: f32,
        baseline: f32,
    ) -> Option<SkPath> {
        let data = self.get(family, bold)?;
        if data.is_synthetic() {
            return None;
        }
        let face = ttf_parser::Face::parse(&data.bytes, 0).ok()?;
        let glyphs = shape(data, text)?;
        let scale = font_size / data.units_per_em;

        let mut pb = PathBuilder::new();
        let mut pen_x = x;
        for glyph in &glyphs {
            let mut sink = GlyphSink {
                pb: &mut pb,
                scale,
                origin_x: pen_x + glyph.x_offset * scale,
                origin_y: baseline - glyph.y_offset * scale,
            };
            face.outline_glyph(ttf_parser::GlyphId(glyph.id), &mut sink);
            pen_x += glyph.x_advance * scale;
        }
        pb.finish()
    }
}

impl Default for FontManager {
    fn default() -> Self {
        let mut mgr = Self::new();
        mgr.ensure_default();
        mgr
    }
}

fn system_font_pair() -> Option<(PathBuf, Option<PathBuf>)> {
    SYSTEM_FONT_CANDIDATES.iter().find_map(|(regular, bold)| {
        let regular = PathBuf::from(regular);
        if !regular.is_file() {
            return None;
        }
        let bold = PathBuf::from(bold);
        Some((regular, bold.is_file().then_some(bold)))
    })
}

/// Average-advance heuristic: 0.5 em per char, bold ~10 % wider.
fn heuristic_width(text: &str, font_size: f32, bold: bool) -> f32 {
    let avg = if bold { 0.55 } else { 0.5 };
    text.chars().count() as f32 * font_size * avg
}

fn shape(data: &FontData, text: &str) -> Option<Vec<ShapedGlyph>> {
    if data.is_synthetic() {
        return None;
    }
    let face = rustybuzz::Face::from_slice(&data.bytes, 0)?;
    let mut buffer = rustybuzz::UnicodeBuffer::new();
    buffer.push_str(text);
    let shaped = rustybuzz::shape(&face, &[], buffer);
    Some(
        shaped
            .glyph_infos()
            .iter()
            .zip(shaped.glyph_positions())
            .map(|(info, pos)| ShapedGlyph {
                id: u16::try_from(info.glyph_id).unwrap_or(0),
                x_advance: pos.x_advance as f32,
                x_offset: pos.x_offset as f32,
                y_offset: pos.y_offset as f32,
            })
            .collect(),
    )
}

/// Receives font-unit outline commands (y up) and emits px path commands
/// (y down) into a shared builder.
struct GlyphSink<'a> {
    pb: &'a mut PathBuilder,
    scale: f32,
    origin_x: f32,
    origin_y: f32,
}

impl GlyphSink<'_> {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl ttf_parser::OutlineBuilder for GlyphSink<'_> {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.pb.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.pb.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.pb.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.pb.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.pb.close();
    }
}

/// Word-wrap text to fit within `max_width` px. Returns the lines.
pub fn wrap_text(
    text: &str,
    font_size: f32,
    bold: bool,
    family: &str,
    max_width: f32,
    fonts: &FontManager,
) -> Vec<String> {
    if max_width <= 0.0 || text.is_empty() {
        return vec![text.to_string()];
    }

    let mut lines: Vec<String> = Vec::new();
    for paragraph in text.split('\n') {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            lines.push(String::new());
            continue;
        }

        let mut current_line = String::new();
        for word in &words {
            let candidate = if current_line.is_empty() {
                word.to_string()
            } else {
                format!("{current_line} {word}")
            };
            let w = fonts.measure_text_width(&candidate, font_size, bold, family);
            if w > max_width && !current_line.is_empty() {
                lines.push(std::mem::replace(&mut current_line, word.to_string()));
            } else {
                current_line = candidate;
            }
        }
        if !current_line.is_empty() {
            lines.push(current_line);
        }
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
