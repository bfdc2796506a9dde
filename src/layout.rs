//! Layout engine – uses Taffy to place the styled card markup on a fixed
//! viewport, then converts the result into a tree of positioned boxes in
//! surface coordinates (CSS px, origin top-left).

use std::collections::HashMap;
use taffy::prelude::*;

use crate::dom::Tag;
use crate::error::{CardError, Result};
use crate::fonts::{wrap_text, FontManager};
use crate::style::{self, ComputedStyle, StyledNode, TextAlign};

// ---------------------------------------------------------------------------
// Output tree
// ---------------------------------------------------------------------------

/// A positioned box in surface coordinates.
#[derive(Debug, Clone)]
pub struct PositionedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub style: ComputedStyle,
    pub content: BoxContent,
    pub children: Vec<PositionedBox>,
}

#[derive(Debug, Clone)]
pub enum BoxContent {
    None,
    Text { lines: Vec<TextLine> },
    Image { src: String, role: Option<String> },
}

/// One laid-out line of text, relative to its box.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub x_offset: f32,
    pub y_offset: f32,
    pub width: f32,
}

/// Text measured at build time; line offsets are resolved once the box
/// width is known.
struct MeasuredText {
    lines: Vec<(String, f32)>,
    line_height: f32,
}

enum PendingContent {
    Text(MeasuredText),
    Image { src: String, role: Option<String> },
}

// ---------------------------------------------------------------------------
// Build Taffy tree from styled nodes
// ---------------------------------------------------------------------------

struct LayoutBuilder<'a> {
    taffy: TaffyTree<()>,
    fonts: &'a FontManager,
    node_styles: HashMap<NodeId, ComputedStyle>,
    node_content: HashMap<NodeId, PendingContent>,
}

impl<'a> LayoutBuilder<'a> {
    fn new(fonts: &'a FontManager) -> Self {
        Self {
            taffy: TaffyTree::new(),
            fonts,
            node_styles: HashMap::new(),
            node_content: HashMap::new(),
        }
    }

    /// True when every child is a text node or an inline element holding
    /// only inline content.
    fn all_inline(children: &[StyledNode]) -> bool {
        children.iter().all(|c| match c {
            StyledNode::Text { .. } => true,
            StyledNode::Element {
                style,
                children: gc,
                tag,
                ..
            } => style.display == style::Display::Inline && *tag != Tag::Img && Self::all_inline(gc),
        })
    }

    /// Flatten an inline subtree into styled text runs with collapsed
    /// whitespace. Spaces between runs are kept; the outer edges are trimmed.
    fn inline_runs(children: &[StyledNode]) -> Vec<(String, ComputedStyle)> {
        fn collect(nodes: &[StyledNode], out: &mut Vec<(String, ComputedStyle)>) {
            for node in nodes {
                match node {
                    StyledNode::Text { text, style } => out.push((collapse_whitespace(text), style.clone())),
                    StyledNode::Element { children, .. } => collect(children, out),
                }
            }
        }

        let mut runs = Vec::new();
        collect(children, &mut runs);

        let mut prev_ends_with_space = true;
        for (text, _) in runs.iter_mut() {
            if prev_ends_with_space {
                *text = text.trim_start().to_string();
            }
            if !text.is_empty() {
                prev_ends_with_space = text.ends_with(' ');
            }
        }
        if let Some((last, _)) = runs.iter_mut().rev().find(|(t, _)| !t.is_empty()) {
            *last = last.trim_end().to_string();
        }
        runs.retain(|(t, _)| !t.is_empty());
        runs
    }

    fn build_node(&mut self, styled: &StyledNode, parent_width: f32) -> Result<NodeId> {
        match styled {
            StyledNode::Text { text, style } => {
                let text = collapse_whitespace(text);
                self.build_text_node(text.trim(), style, parent_width, false)
            }
            StyledNode::Element {
                tag,
                style,
                children,
                attrs,
            } => self.build_element_node(tag, style, children, attrs, parent_width),
        }
    }

    /// A text leaf. With `fill` the leaf spans the whole `max_width` so that
    /// centred and right-aligned lines can be offset inside it.
    fn build_text_node(
        &mut self,
        text: &str,
        style: &ComputedStyle,
        max_width: f32,
        fill: bool,
    ) -> Result<NodeId> {
        let bold = style.is_bold();
        let family = &style.font_family;
        let font_size = style.font_size;
        let line_height = self.fonts.line_height_px(font_size, style.line_height);

        let lines: Vec<(String, f32)> = wrap_text(text, font_size, bold, family, max_width, self.fonts)
            .into_iter()
            .map(|l| {
                let w = self.fonts.measure_text_width(&l, font_size, bold, family);
                (l, w)
            })
            .collect();

        let text_width = lines.iter().map(|(_, w)| *w).fold(0.0f32, f32::max);
        let width = if fill { max_width.max(text_width) } else { text_width };
        let height = lines.len() as f32 * line_height;

        let taffy_style = Style {
            size: Size {
                width: Dimension::Length(width),
                height: Dimension::Length(height),
            },
            flex_shrink: 0.0,
            ..Default::default()
        };

        let node = self.taffy.new_leaf(taffy_style).map_err(layout_error)?;
        self.node_styles.insert(node, style.clone());
        self.node_content
            .insert(node, PendingContent::Text(MeasuredText { lines, line_height }));
        Ok(node)
    }

    fn build_element_node(
        &mut self,
        tag: &Tag,
        style: &ComputedStyle,
        children: &[StyledNode],
        attrs: &HashMap<String, String>,
        parent_width: f32,
    ) -> Result<NodeId> {
        // Width available for children. An auto-width absolute box shrinks
        // to fit, bounded by what remains right of its left offset.
        let my_width = style.width.resolve(parent_width).unwrap_or_else(|| {
            let left = style.left.and_then(|l| l.resolve(parent_width)).unwrap_or(0.0);
            (parent_width - left).max(0.0)
        });
        let inner_width = (my_width
            - style.padding_left
            - style.padding_right
            - 2.0 * style.border_width)
            .max(0.0);

        let mut taffy_style = computed_to_taffy(style);
        let mut child_nodes = Vec::new();

        if *tag != Tag::Img && !children.is_empty() && Self::all_inline(children) {
            let runs = Self::inline_runs(children);
            let single = runs.len() == 1;
            let flex_container = style.display == style::Display::Flex;

            if !single && !flex_container {
                // Mixed runs flow as a wrapping row; alignment moves to the row.
                taffy_style.display = taffy::Display::Flex;
                taffy_style.flex_direction = taffy::FlexDirection::Row;
                taffy_style.flex_wrap = taffy::FlexWrap::Wrap;
                taffy_style.align_items = Some(taffy::AlignItems::Baseline);
                taffy_style.justify_content = Some(match style.text_align {
                    TextAlign::Left => taffy::JustifyContent::Start,
                    TextAlign::Center => taffy::JustifyContent::Center,
                    TextAlign::Right => taffy::JustifyContent::End,
                });
            }

            let fill = single && !flex_container && style.text_align != TextAlign::Left;
            for (text, run_style) in &runs {
                child_nodes.push(self.build_text_node(text, run_style, inner_width, fill)?);
            }
        } else {
            for child in children {
                child_nodes.push(self.build_node(child, inner_width)?);
            }
        }

        if *tag == Tag::Img {
            if let Some(sized) = resolve_img_auto_dimensions(attrs.get("src").map(String::as_str), style, parent_width) {
                taffy_style.size = Size {
                    width: dim_to_taffy(sized.0),
                    height: dim_to_taffy(sized.1),
                };
            }
        }

        let node = self
            .taffy
            .new_with_children(taffy_style, &child_nodes)
            .map_err(layout_error)?;
        self.node_styles.insert(node, style.clone());

        if *tag == Tag::Img {
            let src = attrs.get("src").cloned().unwrap_or_default();
            let role = attrs.get("data-role").cloned();
            self.node_content.insert(node, PendingContent::Image { src, role });
        }

        Ok(node)
    }

    /// Extract positioned boxes after layout computation.
    fn extract(&self, node: NodeId, offset_x: f32, offset_y: f32) -> Result<PositionedBox> {
        let layout = self.taffy.layout(node).map_err(layout_error)?;
        let style = self.node_styles.get(&node).cloned().unwrap_or_default();

        let x = offset_x + layout.location.x;
        let y = offset_y + layout.location.y;
        let width = layout.size.width;

        let content = match self.node_content.get(&node) {
            None => BoxContent::None,
            Some(PendingContent::Image { src, role }) => BoxContent::Image {
                src: src.clone(),
                role: role.clone(),
            },
            Some(PendingContent::Text(measured)) => BoxContent::Text {
                lines: measured
                    .lines
                    .iter()
                    .enumerate()
                    .map(|(i, (text, line_width))| TextLine {
                        text: text.clone(),
                        x_offset: align_offset(style.text_align, width, *line_width),
                        y_offset: i as f32 * measured.line_height,
                        width: *line_width,
                    })
                    .collect(),
            },
        };

        let children = self
            .taffy
            .children(node)
            .map_err(layout_error)?
            .iter()
            .map(|&child| self.extract(child, x, y))
            .collect::<Result<Vec<_>>>()?;

        Ok(PositionedBox {
            x,
            y,
            width,
            height: layout.size.height,
            style,
            content,
            children,
        })
    }
}

fn layout_error(e: taffy::TaffyError) -> CardError {
    CardError::Layout(e.to_string())
}

fn align_offset(align: TextAlign, box_width: f32, line_width: f32) -> f32 {
    match align {
        TextAlign::Left => 0.0,
        TextAlign::Center => ((box_width - line_width) / 2.0).max(0.0),
        TextAlign::Right => (box_width - line_width).max(0.0),
    }
}

/// Collapse every whitespace run to a single space, keeping edge spaces.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for c in text.chars() {
        if c.is_whitespace() && c != '\u{00A0}' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

fn computed_to_taffy(s: &ComputedStyle) -> Style {
    let mut ts = Style::default();

    match s.display {
        style::Display::Flex => {
            ts.display = taffy::Display::Flex;
            ts.flex_direction = match s.flex_direction {
                style::FlexDirection::Row => taffy::FlexDirection::Row,
                style::FlexDirection::Column => taffy::FlexDirection::Column,
            };
            ts.justify_content = Some(match s.justify_content {
                style::JustifyContent::Start => taffy::JustifyContent::Start,
                style::JustifyContent::End => taffy::JustifyContent::End,
                style::JustifyContent::Center => taffy::JustifyContent::Center,
                style::JustifyContent::SpaceBetween => taffy::JustifyContent::SpaceBetween,
            });
            ts.align_items = Some(match s.align_items {
                style::AlignItems::Start => taffy::AlignItems::Start,
                style::AlignItems::End => taffy::AlignItems::End,
                style::AlignItems::Center => taffy::AlignItems::Center,
                style::AlignItems::Stretch => taffy::AlignItems::Stretch,
            });
        }
        style::Display::Block => {
            // Block-level elements stack vertically.
            ts.display = taffy::Display::Flex;
            ts.flex_direction = taffy::FlexDirection::Column;
            ts.align_items = Some(taffy::AlignItems::Start);
        }
        style::Display::Inline => {
            ts.display = taffy::Display::Flex;
            ts.flex_direction = taffy::FlexDirection::Row;
            ts.flex_wrap = taffy::FlexWrap::Wrap;
        }
        style::Display::None => {
            ts.display = taffy::Display::None;
        }
    }

    if s.position == style::Position::Absolute {
        ts.position = taffy::Position::Absolute;
        ts.inset = Rect {
            top: offset_to_taffy(s.top),
            right: offset_to_taffy(s.right),
            bottom: offset_to_taffy(s.bottom),
            left: offset_to_taffy(s.left),
        };
    }

    ts.size = Size {
        width: dim_to_taffy(s.width),
        height: dim_to_taffy(s.height),
    };
    ts.flex_shrink = 0.0;

    ts.margin = Rect {
        top: LengthPercentageAuto::Length(s.margin_top),
        right: LengthPercentageAuto::Length(s.margin_right),
        bottom: LengthPercentageAuto::Length(s.margin_bottom),
        left: LengthPercentageAuto::Length(s.margin_left),
    };
    ts.padding = Rect {
        top: LengthPercentage::Length(s.padding_top),
        right: LengthPercentage::Length(s.padding_right),
        bottom: LengthPercentage::Length(s.padding_bottom),
        left: LengthPercentage::Length(s.padding_left),
    };
    ts.border = Rect {
        top: LengthPercentage::Length(s.border_width),
        right: LengthPercentage::Length(s.border_width),
        bottom: LengthPercentage::Length(s.border_width),
        left: LengthPercentage::Length(s.border_width),
    };

    ts
}

fn dim_to_taffy(d: style::Dimension) -> taffy::Dimension {
    match d {
        style::Dimension::Auto => taffy::Dimension::Auto,
        style::Dimension::Px(v) => taffy::Dimension::Length(v),
        style::Dimension::Percent(v) => taffy::Dimension::Percent(v / 100.0),
    }
}

fn offset_to_taffy(d: Option<style::Dimension>) -> LengthPercentageAuto {
    match d {
        None | Some(style::Dimension::Auto) => LengthPercentageAuto::Auto,
        Some(style::Dimension::Px(v)) => LengthPercentageAuto::Length(v),
        Some(style::Dimension::Percent(v)) => LengthPercentageAuto::Percent(v / 100.0),
    }
}

// ---------------------------------------------------------------------------
// Image intrinsic-size helper
// ---------------------------------------------------------------------------

/// For an `img` with an `Auto` side and an inline data URI, derive concrete
/// dimensions from the decoded image's aspect ratio. `None` when nothing
/// needs fixing or the image cannot be decoded.
fn resolve_img_auto_dimensions(
    src: Option<&str>,
    style: &ComputedStyle,
    parent_width: f32,
) -> Option<(style::Dimension, style::Dimension)> {
    let known_w = style.width.resolve(parent_width);
    let known_h = match style.height {
        style::Dimension::Px(v) => Some(v),
        _ => None,
    };
    if known_w.is_some() && style.height != style::Dimension::Auto {
        return None;
    }

    let (_, bytes) = crate::assets::parse_data_uri(src?).ok()?;
    let img = ::image::load_from_memory(&bytes).ok()?;
    let (px_w, px_h) = (img.width() as f32, img.height() as f32);
    if px_w == 0.0 || px_h == 0.0 {
        return None;
    }
    let aspect = px_w / px_h;

    match (known_w, known_h) {
        (Some(w), None) => Some((style::Dimension::Px(w), style::Dimension::Px((w / aspect).max(1.0)))),
        (None, Some(h)) => Some((style::Dimension::Px((h * aspect).max(1.0)), style::Dimension::Px(h))),
        (None, None) => Some((style::Dimension::Px(px_w), style::Dimension::Px(px_h))),
        (Some(_), Some(_)) => None,
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Lay out a styled tree inside a `width` × `height` viewport. Returns the
/// top-level positioned boxes.
pub fn compute_layout(
    styled_nodes: &[StyledNode],
    width: f32,
    height: f32,
    fonts: &FontManager,
) -> Result<Vec<PositionedBox>> {
    let mut builder = LayoutBuilder::new(fonts);

    let child_ids = styled_nodes
        .iter()
        .map(|node| builder.build_node(node, width))
        .collect::<Result<Vec<_>>>()?;

    let root_style = Style {
        display: taffy::Display::Flex,
        flex_direction: taffy::FlexDirection::Column,
        align_items: Some(taffy::AlignItems::Start),
        size: Size {
            width: Dimension::Length(width),
            height: Dimension::Length(height),
        },
        ..Default::default()
    };

    let root = builder
        .taffy
        .new_with_children(root_style, &child_ids)
        .map_err(layout_error)?;

    builder
        .taffy
        .compute_layout(
            root,
            Size {
                width: AvailableSpace::Definite(width),
                height: AvailableSpace::Definite(height),
            },
        )
        .map_err(layout_error)?;

    let root_box = builder.extract(root, 0.0, 0.0)?;
    Ok(root_box.children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::parse_markup;
    use crate::style::{build_styled_tree, PX_PER_MM};

    fn layout(markup: &str) -> Vec<PositionedBox> {
        let dom = parse_markup(markup);
        let styled = build_styled_tree(&dom, None);
        let fonts = FontManager::default();
        compute_layout(&styled, 567.0, 800.0, &fonts).unwrap()
    }

    #[test]
    fn absolute_box_lands_on_offsets() {
        let boxes = layout(
            r#"<div style="position: relative; width: 150mm; height: 212mm">
                 <div style="position: absolute; top: 35mm; left: 34mm; width: 70mm; height: 85mm"></div>
               </div>"#,
        );
        let photo = &boxes[0].children[0];
        assert!((photo.x - 34.0 * PX_PER_MM).abs() < 0.5);
        assert!((photo.y - 35.0 * PX_PER_MM).abs() < 0.5);
        assert!((photo.width - 70.0 * PX_PER_MM).abs() < 0.5);
        assert!((photo.height - 85.0 * PX_PER_MM).abs() < 0.5);
    }

    #[test]
    fn full_size_background_image() {
        let boxes = layout(
            r#"<div style="position: relative; width: 567px; height: 800px">
                 <img src="images/fondo.png" data-role="background" style="position: absolute; top: 0; left: 0; width: 100%; height: 100%">
               </div>"#,
        );
        let img = &boxes[0].children[0];
        assert_eq!(img.width, 567.0);
        assert_eq!(img.height, 800.0);
        match &img.content {
            BoxContent::Image { src, role } => {
                assert_eq!(src, "images/fondo.png");
                assert_eq!(role.as_deref(), Some("background"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn centred_text_is_offset_inside_box() {
        let boxes = layout(
            r#"<div style="position: absolute; top: 0; left: 0; width: 200px; text-align: center; font-size: 10px">ABCD</div>"#,
        );
        let text = &boxes[0].children[0];
        let BoxContent::Text { lines } = &text.content else {
            panic!("expected text");
        };
        // 4 chars × 10 × 0.5 = 20 px wide, centred in 200 px.
        assert_eq!(lines.len(), 1);
        assert!((lines[0].x_offset - 90.0).abs() < 0.5);
    }

    #[test]
    fn label_value_spans_flow_on_one_row() {
        let boxes = layout(
            r#"<div style="position: absolute; top: 10px; left: 20px; font-size: 11px">
                 <span style="color: #374151">Municipio: </span><span style="font-weight: bold">Pachuca</span>
               </div>"#,
        );
        let row = &boxes[0];
        assert_eq!(row.children.len(), 2);
        let (label, value) = (&row.children[0], &row.children[1]);
        assert!((label.y - value.y).abs() < 0.5);
        assert!(value.x >= label.x + label.width - 0.5);
        let BoxContent::Text { lines } = &label.content else {
            panic!("expected text");
        };
        assert_eq!(lines[0].text, "Municipio: ");
        assert!(value.style.is_bold());
    }

    #[test]
    fn inline_runs_trim_outer_edges_only() {
        let dom = parse_markup("<div> <span> Folio: </span><span>12</span> </div>");
        let styled = build_styled_tree(&dom, None);
        let StyledNode::Element { children, .. } = &styled[0] else {
            panic!("expected div");
        };
        let runs: Vec<String> = LayoutBuilder::inline_runs(children)
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(runs, vec!["Folio: ".to_string(), "12".to_string()]);
    }

    #[test]
    fn long_paragraph_wraps() {
        let boxes = layout(
            r#"<div style="position: absolute; top: 0; left: 0; width: 100px; font-size: 10px">uno dos tres cuatro cinco seis siete</div>"#,
        );
        let BoxContent::Text { lines } = &boxes[0].children[0].content else {
            panic!("expected text");
        };
        assert!(lines.len() > 1);
        assert!(lines.windows(2).all(|w| w[1].y_offset > w[0].y_offset));
    }
}
