//! Style resolver – maps the inline `style` attribute of card markup to a
//! flat [`ComputedStyle`] consumed by the layout engine and the rasterizer.
//!
//! All lengths are resolved to CSS pixels at the 96 DPI reference, so
//! `150mm` becomes ~566.9 px.

use crate::dom::{DomNode, ElementNode, Tag};

/// CSS pixels per millimetre at 96 DPI.
pub const PX_PER_MM: f32 = 96.0 / 25.4;

/// Fully resolved style for a single element.
#[derive(Debug, Clone)]
pub struct ComputedStyle {
    // Display / layout
    pub display: Display,
    pub position: Position,
    pub flex_direction: FlexDirection,
    pub justify_content: JustifyContent,
    pub align_items: AlignItems,

    // Offsets for positioned elements
    pub top: Option<Dimension>,
    pub right: Option<Dimension>,
    pub bottom: Option<Dimension>,
    pub left: Option<Dimension>,

    // Sizing
    pub width: Dimension,
    pub height: Dimension,

    // Spacing (px)
    pub margin_top: f32,
    pub margin_right: f32,
    pub margin_bottom: f32,
    pub margin_left: f32,
    pub padding_top: f32,
    pub padding_right: f32,
    pub padding_bottom: f32,
    pub padding_left: f32,

    // Border
    pub border_width: f32,
    pub border_color: Color,

    // Typography (inherited)
    pub font_size: f32,
    pub font_weight: FontWeight,
    pub font_family: String,
    pub color: Color,
    pub text_align: TextAlign,
    pub line_height: f32,
    pub text_transform: TextTransform,

    // Painting
    pub background_color: Color,
    pub object_fit: ObjectFit,
    pub overflow_hidden: bool,
    pub z_index: i32,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: Display::Block,
            position: Position::Static,
            flex_direction: FlexDirection::Row,
            justify_content: JustifyContent::Start,
            align_items: AlignItems::Stretch,
            top: None,
            right: None,
            bottom: None,
            left: None,
            width: Dimension::Auto,
            height: Dimension::Auto,
            margin_top: 0.0,
            margin_right: 0.0,
            margin_bottom: 0.0,
            margin_left: 0.0,
            padding_top: 0.0,
            padding_right: 0.0,
            padding_bottom: 0.0,
            padding_left: 0.0,
            border_width: 0.0,
            border_color: Color::BLACK,
            font_size: 16.0,
            font_weight: FontWeight::Normal,
            font_family: "sans-serif".to_string(),
            color: Color::BLACK,
            text_align: TextAlign::Left,
            line_height: 1.2,
            text_transform: TextTransform::None,
            background_color: Color::TRANSPARENT,
            object_fit: ObjectFit::Fill,
            overflow_hidden: false,
            z_index: 0,
        }
    }
}

impl ComputedStyle {
    pub fn is_bold(&self) -> bool {
        self.font_weight == FontWeight::Bold
    }

    /// Inherit only the typographic properties of `parent`.
    fn inheriting(parent: &ComputedStyle) -> Self {
        Self {
            font_size: parent.font_size,
            font_weight: parent.font_weight,
            font_family: parent.font_family.clone(),
            color: parent.color,
            text_align: parent.text_align,
            line_height: parent.line_height,
            text_transform: parent.text_transform,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Supporting enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Display {
    Block,
    Flex,
    Inline,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Static,
    Relative,
    Absolute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlexDirection {
    Row,
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JustifyContent {
    Start,
    End,
    Center,
    SpaceBetween,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignItems {
    Start,
    End,
    Center,
    Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontWeight {
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextTransform {
    None,
    Uppercase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFit {
    Fill,
    Cover,
    Contain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dimension {
    Auto,
    Px(f32),
    Percent(f32),
}

impl Dimension {
    /// Resolve against a containing length; `Auto` yields `None`.
    pub fn resolve(self, container: f32) -> Option<f32> {
        match self {
            Dimension::Auto => None,
            Dimension::Px(v) => Some(v),
            Dimension::Percent(p) => Some(container * p / 100.0),
        }
    }
}

/// RGBA colour (0.0 – 1.0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };
    pub const WHITE: Self = Self {
        r: 1.0,
        g: 1.0,
        b: 1.0,
        a: 1.0,
    };
    pub const TRANSPARENT: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 0.0,
    };

    pub fn is_transparent(&self) -> bool {
        self.a < 0.001
    }

    /// 8-bit RGBA channels.
    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim().strip_prefix('#')?;
        let channel = |s: &str| u8::from_str_radix(s, 16).ok().map(|v| v as f32 / 255.0);
        match hex.len() {
            6 => Some(Self {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
                a: 1.0,
            }),
            3 => Some(Self {
                r: channel(&hex[0..1].repeat(2))?,
                g: channel(&hex[1..2].repeat(2))?,
                b: channel(&hex[2..3].repeat(2))?,
                a: 1.0,
            }),
            _ => None,
        }
    }

    /// `#rgb`, `#rrggbb`, `rgb(r, g, b)`, `rgba(r, g, b, a)` and a few
    /// keywords.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "white" => return Some(Self::WHITE),
            "black" => return Some(Self::BLACK),
            "transparent" => return Some(Self::TRANSPARENT),
            _ => {}
        }
        if value.starts_with('#') {
            return Self::from_hex(value);
        }
        let inner = value
            .strip_prefix("rgba(")
            .or_else(|| value.strip_prefix("rgb("))?
            .strip_suffix(')')?;
        let parts: Vec<f32> = inner
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .ok()?;
        let (r, g, b, a) = match parts.as_slice() {
            [r, g, b] => (*r, *g, *b, 1.0),
            [r, g, b, a] => (*r, *g, *b, *a),
            _ => return None,
        };
        Some(Self {
            r: r / 255.0,
            g: g / 255.0,
            b: b / 255.0,
            a: a.clamp(0.0, 1.0),
        })
    }
}

// ---------------------------------------------------------------------------
// Style resolution
// ---------------------------------------------------------------------------

/// Resolve the style for an element, inheriting text properties from its parent.
pub fn resolve_style(element: &ElementNode, parent: Option<&ComputedStyle>) -> ComputedStyle {
    let mut style = match parent {
        Some(p) => ComputedStyle::inheriting(p),
        None => ComputedStyle::default(),
    };
    apply_tag_defaults(&mut style, &element.tag);
    if let Some(inline) = element.inline_style() {
        apply_inline_style(&mut style, inline);
    }
    style
}

fn apply_tag_defaults(s: &mut ComputedStyle, tag: &Tag) {
    match tag {
        Tag::Span => s.display = Display::Inline,
        Tag::Unknown(_) | Tag::Head => s.display = Display::None,
        Tag::Div | Tag::P | Tag::Img | Tag::Body | Tag::Html => {}
    }
}

pub fn apply_inline_style(s: &mut ComputedStyle, style_str: &str) {
    for decl in style_str.split(';') {
        let Some((prop, val)) = decl.split_once(':') else {
            continue;
        };
        apply_css_property(s, prop.trim(), val.trim());
    }
}

fn apply_css_property(s: &mut ComputedStyle, prop: &str, val: &str) {
    let font_size = s.font_size;
    match prop {
        "display" => {
            s.display = match val {
                "flex" => Display::Flex,
                "block" => Display::Block,
                "inline" | "inline-block" => Display::Inline,
                "none" => Display::None,
                _ => s.display,
            }
        }
        "position" => {
            s.position = match val {
                "absolute" => Position::Absolute,
                "relative" => Position::Relative,
                _ => Position::Static,
            }
        }
        "top" => s.top = parse_offset(val, font_size),
        "right" => s.right = parse_offset(val, font_size),
        "bottom" => s.bottom = parse_offset(val, font_size),
        "left" => s.left = parse_offset(val, font_size),
        "flex-direction" => {
            s.flex_direction = match val {
                "column" => FlexDirection::Column,
                _ => FlexDirection::Row,
            }
        }
        "justify-content" => {
            s.justify_content = match val {
                "center" => JustifyContent::Center,
                "flex-end" | "end" => JustifyContent::End,
                "space-between" => JustifyContent::SpaceBetween,
                _ => JustifyContent::Start,
            }
        }
        "align-items" => {
            s.align_items = match val {
                "center" => AlignItems::Center,
                "flex-end" | "end" => AlignItems::End,
                "flex-start" | "start" => AlignItems::Start,
                _ => AlignItems::Stretch,
            }
        }
        "width" => s.width = parse_dimension(val, font_size),
        "height" => s.height = parse_dimension(val, font_size),
        "font-size" => {
            if let Some(px) = parse_length(val, font_size) {
                s.font_size = px;
            }
        }
        "font-weight" => {
            s.font_weight = match val {
                "bold" | "bolder" | "600" | "700" | "800" | "900" => FontWeight::Bold,
                _ => FontWeight::Normal,
            }
        }
        "font-family" => {
            if let Some(first) = val.split(',').next() {
                s.font_family = first.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
            }
        }
        "color" => {
            if let Some(c) = Color::parse(val) {
                s.color = c;
            }
        }
        "background-color" | "background" => {
            if let Some(c) = Color::parse(val) {
                s.background_color = c;
            }
        }
        "text-align" => {
            s.text_align = match val {
                "center" => TextAlign::Center,
                "right" | "end" => TextAlign::Right,
                _ => TextAlign::Left,
            }
        }
        "text-transform" => {
            s.text_transform = match val {
                "uppercase" => TextTransform::Uppercase,
                _ => TextTransform::None,
            }
        }
        "line-height" => {
            if let Ok(v) = val.parse::<f32>() {
                s.line_height = v;
            } else if let Some(px) = parse_length(val, font_size) {
                s.line_height = px / font_size;
            }
        }
        "margin" => {
            let [t, r, b, l] = parse_box_shorthand(val, font_size);
            (s.margin_top, s.margin_right, s.margin_bottom, s.margin_left) = (t, r, b, l);
        }
        "margin-top" => set_length(&mut s.margin_top, val, font_size),
        "margin-right" => set_length(&mut s.margin_right, val, font_size),
        "margin-bottom" => set_length(&mut s.margin_bottom, val, font_size),
        "margin-left" => set_length(&mut s.margin_left, val, font_size),
        "padding" => {
            let [t, r, b, l] = parse_box_shorthand(val, font_size);
            (s.padding_top, s.padding_right, s.padding_bottom, s.padding_left) = (t, r, b, l);
        }
        "padding-top" => set_length(&mut s.padding_top, val, font_size),
        "padding-right" => set_length(&mut s.padding_right, val, font_size),
        "padding-bottom" => set_length(&mut s.padding_bottom, val, font_size),
        "padding-left" => set_length(&mut s.padding_left, val, font_size),
        "border" => {
            for part in val.split_whitespace() {
                if let Some(px) = parse_length(part, font_size) {
                    s.border_width = px;
                } else if let Some(c) = Color::parse(part) {
                    s.border_color = c;
                }
            }
        }
        "border-width" => set_length(&mut s.border_width, val, font_size),
        "border-color" => {
            if let Some(c) = Color::parse(val) {
                s.border_color = c;
            }
        }
        "object-fit" => {
            s.object_fit = match val {
                "cover" => ObjectFit::Cover,
                "contain" => ObjectFit::Contain,
                _ => ObjectFit::Fill,
            }
        }
        "overflow" => s.overflow_hidden = val == "hidden",
        "z-index" => {
            if let Ok(z) = val.parse() {
                s.z_index = z;
            }
        }
        _ => {}
    }
}

fn set_length(slot: &mut f32, val: &str, font_size: f32) {
    if let Some(px) = parse_length(val, font_size) {
        *slot = px;
    }
}

/// Parse an absolute length (`px`, `mm`, `cm`, `pt`, `em`, or a bare number)
/// into CSS pixels.
pub fn parse_length(val: &str, font_size: f32) -> Option<f32> {
    let val = val.trim();
    let split = val
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(val.len());
    let (number, unit) = val.split_at(split);
    let number: f32 = number.parse().ok()?;
    let factor = match unit.trim() {
        "" | "px" => 1.0,
        "mm" => PX_PER_MM,
        "cm" => PX_PER_MM * 10.0,
        "pt" => 96.0 / 72.0,
        "em" | "rem" => font_size,
        _ => return None,
    };
    Some(number * factor)
}

fn parse_dimension(val: &str, font_size: f32) -> Dimension {
    let val = val.trim();
    if val == "auto" {
        Dimension::Auto
    } else if let Some(p) = val.strip_suffix('%') {
        p.trim().parse().map(Dimension::Percent).unwrap_or(Dimension::Auto)
    } else {
        parse_length(val, font_size)
            .map(Dimension::Px)
            .unwrap_or(Dimension::Auto)
    }
}

fn parse_offset(val: &str, font_size: f32) -> Option<Dimension> {
    match parse_dimension(val, font_size) {
        Dimension::Auto => None,
        d => Some(d),
    }
}

/// CSS box shorthand (1, 2, 3 or 4 values) → `[top, right, bottom, left]`.
fn parse_box_shorthand(val: &str, font_size: f32) -> [f32; 4] {
    let parts: Vec<f32> = val
        .split_whitespace()
        .filter_map(|p| parse_length(p, font_size))
        .collect();
    match parts.as_slice() {
        [a] => [*a, *a, *a, *a],
        [v, h] => [*v, *h, *v, *h],
        [t, h, b] => [*t, *h, *b, *h],
        [t, r, b, l] => [*t, *r, *b, *l],
        _ => [0.0; 4],
    }
}

// ---------------------------------------------------------------------------
// Styled DOM tree
// ---------------------------------------------------------------------------

/// A DOM node annotated with its computed style.
#[derive(Debug, Clone)]
pub enum StyledNode {
    Element {
        tag: Tag,
        style: ComputedStyle,
        children: Vec<StyledNode>,
        /// Original attributes (image `src`, `data-role`, ...).
        attrs: std::collections::HashMap<String, String>,
    },
    Text {
        text: String,
        style: ComputedStyle,
    },
}

/// Build a styled tree from a DOM tree, resolving styles top-down.
pub fn build_styled_tree(
    nodes: &[DomNode],
    parent_style: Option<&ComputedStyle>,
) -> Vec<StyledNode> {
    let mut result = Vec::new();
    for node in nodes {
        match node {
            DomNode::Element(e) => {
                let style = resolve_style(e, parent_style);
                if style.display == Display::None {
                    continue;
                }
                let children = build_styled_tree(&e.children, Some(&style));
                result.push(StyledNode::Element {
                    tag: e.tag.clone(),
                    style,
                    children,
                    attrs: e.attributes.clone(),
                });
            }
            DomNode::Text(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                // Text renders inline: it carries typography only.
                let style = match parent_style {
                    Some(p) => ComputedStyle::inheriting(p),
                    None => ComputedStyle::default(),
                };
                let text = match style.text_transform {
                    TextTransform::Uppercase => text.to_uppercase(),
                    TextTransform::None => text.clone(),
                };
                result.push(StyledNode::Text { text, style });
            }
        }
    }
    result
}
