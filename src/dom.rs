//! Markup parser – turns card template markup into a small DOM tree.
//!
//! Card templates use a controlled subset:
//! - Containers: `div`, `p`
//! - Inline runs: `span`
//! - Raster assets: `img` (void element)
//! - Styling via the `style` attribute; roles via `data-role`

use std::collections::HashMap;

// ---------------------------------------------------------------------------
// DOM types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Div,
    P,
    Span,
    Img,
    Body,
    Html,
    Head,
    /// Anything else. Kept in the tree but never laid out.
    Unknown(String),
}

impl Tag {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "div" => Tag::Div,
            "p" => Tag::P,
            "span" => Tag::Span,
            "img" => Tag::Img,
            "body" => Tag::Body,
            "html" => Tag::Html,
            "head" => Tag::Head,
            _ => Tag::Unknown(name.to_string()),
        }
    }

    fn is_void(&self) -> bool {
        matches!(self, Tag::Img)
    }
}

#[derive(Debug, Clone)]
pub enum DomNode {
    Element(ElementNode),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ElementNode {
    pub tag: Tag,
    pub attributes: HashMap<String, String>,
    pub children: Vec<DomNode>,
}

impl ElementNode {
    pub fn new(tag: Tag) -> Self {
        Self {
            tag,
            attributes: HashMap::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|s| s.as_str())
    }

    pub fn inline_style(&self) -> Option<&str> {
        self.attr("style")
    }

    pub fn src(&self) -> Option<&str> {
        self.attr("src")
    }

    pub fn role(&self) -> Option<&str> {
        self.attr("data-role")
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse markup into a list of top-level nodes. Malformed input never fails:
/// unclosed elements are closed at end of input and stray closing tags end
/// the current element.
pub fn parse_markup(markup: &str) -> Vec<DomNode> {
    let mut parser = Parser::new(markup);
    parser.parse_nodes()
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse_nodes(&mut self) -> Vec<DomNode> {
        let mut nodes = Vec::new();
        loop {
            self.skip_inter_element_whitespace();
            if self.eof() || self.starts_with("</") {
                break;
            }
            if let Some(node) = self.parse_node() {
                nodes.push(node);
            }
        }
        nodes
    }

    fn parse_node(&mut self) -> Option<DomNode> {
        if self.starts_with("<!--") {
            self.skip_past("-->");
            return None;
        }
        if self.starts_with("<!") || self.starts_with("<?") {
            self.skip_past(">");
            return None;
        }
        if self.starts_with("<") {
            Some(self.parse_element())
        } else {
            Some(self.parse_text())
        }
    }

    fn parse_text(&mut self) -> DomNode {
        let start = self.pos;
        let len = self.rest().find('<').unwrap_or(self.rest().len());
        self.pos += len;
        DomNode::Text(decode_entities(&self.input[start..self.pos]))
    }

    fn parse_element(&mut self) -> DomNode {
        self.pos += 1; // '<'
        let tag = Tag::from_name(&self.parse_name());
        let mut elem = ElementNode::new(tag);

        loop {
            self.skip_whitespace();
            if self.eof() || self.starts_with(">") || self.starts_with("/>") {
                break;
            }
            let before = self.pos;
            let (key, value) = self.parse_attribute();
            if self.pos == before {
                // Unparseable attribute character; skip it.
                self.advance_char();
                continue;
            }
            if !key.is_empty() {
                elem.attributes.insert(key.to_ascii_lowercase(), value);
            }
        }

        if self.starts_with("/>") {
            self.pos += 2;
            return DomNode::Element(elem);
        }
        if self.starts_with(">") {
            self.pos += 1;
        }
        if elem.tag.is_void() {
            return DomNode::Element(elem);
        }

        elem.children = self.parse_nodes();

        if self.starts_with("</") {
            self.pos += 2;
            self.parse_name();
            self.skip_past(">");
        }

        DomNode::Element(elem)
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        let len = self
            .rest()
            .find(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
            .unwrap_or(self.rest().len());
        self.pos += len;
        self.input[start..self.pos].to_string()
    }

    fn parse_attribute(&mut self) -> (String, String) {
        let key = self.parse_name();
        self.skip_whitespace();
        if !self.starts_with("=") {
            return (key, String::new());
        }
        self.pos += 1;
        self.skip_whitespace();
        (key, self.parse_attr_value())
    }

    fn parse_attr_value(&mut self) -> String {
        for quote in ['"', '\''] {
            if self.rest().starts_with(quote) {
                self.pos += 1;
                let len = self.rest().find(quote).unwrap_or(self.rest().len());
                let raw = &self.input[self.pos..self.pos + len];
                self.pos += len;
                if !self.eof() {
                    self.pos += 1;
                }
                return decode_entities(raw);
            }
        }
        let len = self
            .rest()
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(self.rest().len());
        let raw = &self.input[self.pos..self.pos + len];
        self.pos += len;
        decode_entities(raw)
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    /// Drop whitespace between tags; keep it when it leads into text.
    fn skip_inter_element_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        if trimmed.is_empty() || trimmed.starts_with('<') {
            self.pos = self.input.len() - trimmed.len();
        }
    }

    fn skip_past(&mut self, marker: &str) {
        match self.rest().find(marker) {
            Some(idx) => self.pos += idx + marker.len(),
            None => self.pos = self.input.len(),
        }
    }

    fn advance_char(&mut self) {
        if let Some(c) = self.rest().chars().next() {
            self.pos += c.len_utf8();
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    fn eof(&self) -> bool {
        self.pos >= self.input.len()
    }
}

fn decode_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{00A0}")
        .replace("&amp;", "&")
}

/// Escape text for interpolation into markup (text or quoted attribute).
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Depth-first list of every `img` element in the tree.
pub fn image_elements(nodes: &[DomNode]) -> Vec<&ElementNode> {
    let mut found = Vec::new();
    collect_images(nodes, &mut found);
    found
}

fn collect_images<'a>(nodes: &'a [DomNode], out: &mut Vec<&'a ElementNode>) {
    for node in nodes {
        if let DomNode::Element(e) = node {
            if e.tag == Tag::Img {
                out.push(e);
            }
            collect_images(&e.children, out);
        }
    }
}

/// Depth-first search for the first element carrying `data-role="<role>"`.
pub fn find_by_role<'a>(nodes: &'a [DomNode], role: &str) -> Option<&'a ElementNode> {
    for node in nodes {
        if let DomNode::Element(e) = node {
            if e.role() == Some(role) {
                return Some(e);
            }
            if let Some(found) = find_by_role(&e.children, role) {
                return Some(found);
            }
        }
    }
    None
}

/// Concatenated text content of a subtree, whitespace-collapsed.
pub fn text_content(nodes: &[DomNode]) -> String {
    fn walk(nodes: &[DomNode], out: &mut String) {
        for node in nodes {
            match node {
                DomNode::Text(t) => {
                    out.push_str(t);
                    out.push(' ');
                }
                DomNode::Element(e) => walk(&e.children, out),
            }
        }
    }
    let mut raw = String::new();
    walk(nodes, &mut raw);
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_nested_div() {
        let nodes = parse_markup(r#"<div style="position: absolute"><p>Hola</p></div>"#);
        assert_eq!(nodes.len(), 1);
        let DomNode::Element(e) = &nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(e.tag, Tag::Div);
        assert_eq!(e.inline_style(), Some("position: absolute"));
        assert_eq!(e.children.len(), 1);
    }

    #[test]
    fn img_is_void_even_without_slash() {
        let nodes = parse_markup(r#"<div><img src="a.png" data-role="background"><span>x</span></div>"#);
        let DomNode::Element(div) = &nodes[0] else {
            panic!("expected div");
        };
        assert_eq!(div.children.len(), 2);
        let images = image_elements(&nodes);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].src(), Some("a.png"));
        assert_eq!(images[0].role(), Some("background"));
    }

    #[test]
    fn entities_round_trip_through_escape() {
        let original = r#"Pérez & "Hijos" <SA>"#;
        let markup = format!("<span title=\"{0}\">{0}</span>", escape_text(original));
        let nodes = parse_markup(&markup);
        let DomNode::Element(span) = &nodes[0] else {
            panic!("expected span");
        };
        assert_eq!(span.attr("title"), Some(original));
        assert_eq!(text_content(&nodes), original);
    }

    #[test]
    fn comments_are_skipped() {
        let nodes = parse_markup("<!-- fondo --><div>a</div>");
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn text_keeps_edge_whitespace() {
        let nodes = parse_markup("<span>Municipio: </span>");
        let DomNode::Element(span) = &nodes[0] else {
            panic!("expected span");
        };
        match &span.children[0] {
            DomNode::Text(t) => assert_eq!(t, "Municipio: "),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn find_role_in_tree() {
        let nodes = parse_markup(r#"<div><div data-role="photo-placeholder">Sin foto</div></div>"#);
        let placeholder = find_by_role(&nodes, "photo-placeholder").unwrap();
        assert_eq!(text_content(&placeholder.children), "Sin foto");
        assert!(find_by_role(&nodes, "photo").is_none());
    }
}
