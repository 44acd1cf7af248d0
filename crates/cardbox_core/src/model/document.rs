//! Structured document model and its wire codec.
//!
//! # Responsibility
//! - Hold the canonical in-memory tree for card content.
//! - Decode stored content (structured JSON or legacy plain text) in one step.
//! - Serialize back to the only persisted shape: `{"type":"doc","content":[...]}`.
//! - Derive plain-text previews.
//!
//! # Invariants
//! - Decoding never fails; malformed input becomes the empty document.
//! - An empty block list is the canonical empty state.
//! - `Document::parse(&doc.serialize()?) == doc` for every decoded document.
//! - Unknown node/mark kinds are preserved, not dropped.

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Marker emitted into plain text for each wiki-link.
pub const WIKI_LINK_SENTINEL: char = '→';
const TRUNCATION_MARKER: &str = "...";

/// Node and mark attributes. Key order is irrelevant to equality.
pub type Attrs = Map<String, Value>;

/// Node kind tag, serialized as the editor's `type` name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    Doc,
    Paragraph,
    Heading,
    BulletList,
    OrderedList,
    ListItem,
    Blockquote,
    CodeBlock,
    Text,
    WikiLink,
    HardBreak,
    /// Any kind this crate does not interpret; kept verbatim.
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Doc => "doc",
            Self::Paragraph => "paragraph",
            Self::Heading => "heading",
            Self::BulletList => "bulletList",
            Self::OrderedList => "orderedList",
            Self::ListItem => "listItem",
            Self::Blockquote => "blockquote",
            Self::CodeBlock => "codeBlock",
            Self::Text => "text",
            Self::WikiLink => "wikiLink",
            Self::HardBreak => "hardBreak",
            Self::Other(name) => name.as_str(),
        }
    }

    /// Block-level kinds get a separator in plain-text output.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            Self::Paragraph
                | Self::Heading
                | Self::BulletList
                | Self::OrderedList
                | Self::ListItem
                | Self::Blockquote
                | Self::CodeBlock
        )
    }
}

impl From<String> for NodeKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "doc" => Self::Doc,
            "paragraph" => Self::Paragraph,
            "heading" => Self::Heading,
            "bulletList" => Self::BulletList,
            "orderedList" => Self::OrderedList,
            "listItem" => Self::ListItem,
            "blockquote" => Self::Blockquote,
            "codeBlock" => Self::CodeBlock,
            "text" => Self::Text,
            "wikiLink" => Self::WikiLink,
            "hardBreak" => Self::HardBreak,
            _ => Self::Other(value),
        }
    }
}

impl From<NodeKind> for String {
    fn from(value: NodeKind) -> Self {
        match value {
            NodeKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Inline mark kind applied to a text run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MarkKind {
    Bold,
    Italic,
    Strike,
    Code,
    Link,
    WikiLink,
    Other(String),
}

impl MarkKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bold => "bold",
            Self::Italic => "italic",
            Self::Strike => "strike",
            Self::Code => "code",
            Self::Link => "link",
            Self::WikiLink => "wikiLink",
            Self::Other(name) => name.as_str(),
        }
    }
}

impl From<String> for MarkKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "bold" => Self::Bold,
            "italic" => Self::Italic,
            "strike" => Self::Strike,
            "code" => Self::Code,
            "link" => Self::Link,
            "wikiLink" => Self::WikiLink,
            _ => Self::Other(value),
        }
    }
}

impl From<MarkKind> for String {
    fn from(value: MarkKind) -> Self {
        match value {
            MarkKind::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Inline mark with optional attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    #[serde(rename = "type")]
    pub kind: MarkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Attrs>,
}

impl Mark {
    pub fn new(kind: MarkKind) -> Self {
        Self { kind, attrs: None }
    }

    /// `wikiLink` mark pointing at `target_id`.
    pub fn wiki_link(target_id: impl Into<String>) -> Self {
        let mut attrs = Attrs::new();
        attrs.insert("targetId".to_string(), Value::String(target_id.into()));
        Self {
            kind: MarkKind::WikiLink,
            attrs: Some(attrs),
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.as_ref()?.get(key)?.as_str()
    }
}

/// One node of the document tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<Attrs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marks: Option<Vec<Mark>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            attrs: None,
            content: None,
            marks: None,
            text: None,
        }
    }

    /// Text leaf without marks.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(NodeKind::Text)
        }
    }

    /// Text leaf carrying the given marks.
    pub fn marked_text(text: impl Into<String>, marks: Vec<Mark>) -> Self {
        Self {
            marks: Some(marks),
            ..Self::text(text)
        }
    }

    /// Non-leaf node with ordered children.
    pub fn with_children(kind: NodeKind, children: Vec<Node>) -> Self {
        Self {
            content: Some(children),
            ..Self::new(kind)
        }
    }

    pub fn paragraph(children: Vec<Node>) -> Self {
        Self::with_children(NodeKind::Paragraph, children)
    }

    pub fn heading(level: u8, children: Vec<Node>) -> Self {
        let mut attrs = Attrs::new();
        attrs.insert("level".to_string(), Value::from(level));
        Self {
            attrs: Some(attrs),
            ..Self::with_children(NodeKind::Heading, children)
        }
    }

    /// Atomic wiki-link node.
    pub fn wiki_link(title: impl Into<String>, target_id: impl Into<String>, exists: bool) -> Self {
        let mut attrs = Attrs::new();
        attrs.insert("title".to_string(), Value::String(title.into()));
        attrs.insert("targetId".to_string(), Value::String(target_id.into()));
        attrs.insert("exists".to_string(), Value::Bool(exists));
        Self {
            attrs: Some(attrs),
            ..Self::new(NodeKind::WikiLink)
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.as_ref()?.get(key)?.as_str()
    }

    pub fn children(&self) -> &[Node] {
        self.content.as_deref().unwrap_or(&[])
    }

    pub fn marks(&self) -> &[Mark] {
        self.marks.as_deref().unwrap_or(&[])
    }

    pub fn has_mark(&self, kind: &MarkKind) -> bool {
        self.marks().iter().any(|mark| &mark.kind == kind)
    }
}

/// Card body: the ordered block list under the `doc` root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub blocks: Vec<Node>,
}

#[derive(Debug, Deserialize)]
struct WireDocument {
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    content: Option<Vec<Node>>,
}

#[derive(Serialize)]
struct WireDocumentRef<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a [Node],
}

/// Shape of stored content, decided once at the boundary.
#[derive(Debug)]
enum RawContent {
    Structured(WireDocument),
    Legacy(String),
    Blank,
    Malformed(String),
}

impl RawContent {
    fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Blank;
        }
        if trimmed.starts_with('{') {
            return match serde_json::from_str::<WireDocument>(trimmed) {
                Ok(wire) => Self::Structured(wire),
                Err(err) => Self::Malformed(err.to_string()),
            };
        }
        Self::Legacy(raw.to_string())
    }

    fn classify_value(value: &Value) -> Self {
        match value {
            Value::String(text) if text.trim().is_empty() => Self::Blank,
            Value::String(text) => Self::Legacy(text.clone()),
            Value::Object(_) => match WireDocument::deserialize(value) {
                Ok(wire) => Self::Structured(wire),
                Err(err) => Self::Malformed(err.to_string()),
            },
            Value::Null => Self::Blank,
            other => Self::Malformed(format!("unexpected json {}", json_kind(other))),
        }
    }

    fn into_document(self) -> Document {
        match self {
            Self::Structured(wire) if wire.kind == NodeKind::Doc => Document {
                blocks: wire.content.unwrap_or_default(),
            },
            Self::Structured(wire) => {
                debug!(
                    "event=content_parse module=content status=fallback reason=root_not_doc root={}",
                    wire.kind.as_str()
                );
                Document::empty()
            }
            Self::Legacy(text) => Document::paragraph(text),
            Self::Blank => Document::empty(),
            Self::Malformed(reason) => {
                debug!(
                    "event=content_parse module=content status=fallback reason=malformed detail={}",
                    reason
                );
                Document::empty()
            }
        }
    }
}

impl Document {
    /// Canonical empty document.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Single paragraph holding one plain text run.
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![Node::paragraph(vec![Node::text(text)])],
        }
    }

    pub fn from_blocks(blocks: Vec<Node>) -> Self {
        Self { blocks }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Decodes stored content.
    ///
    /// Accepts a serialized `doc` tree or legacy plain text. Anything that
    /// looks structured but is not a valid `doc` tree yields the empty
    /// document.
    pub fn parse(raw: &str) -> Self {
        RawContent::classify(raw).into_document()
    }

    /// Same decode rules as [`Document::parse`] for an already-decoded value.
    pub fn from_value(value: &Value) -> Self {
        RawContent::classify_value(value).into_document()
    }

    /// Encodes to the persisted wire form.
    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireDocumentRef {
            kind: "doc",
            content: &self.blocks,
        })
    }

    /// Depth-first walk over every node, blocks first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        fn descend<'a>(node: &'a Node, visit: &mut impl FnMut(&'a Node)) {
            visit(node);
            for child in node.children() {
                descend(child, visit);
            }
        }
        for block in &self.blocks {
            descend(block, visit);
        }
    }
}

/// Flattens a document into preview text.
///
/// Text leaves are concatenated in document order, every wiki-link adds
/// [`WIKI_LINK_SENTINEL`], block nodes are followed by a space. Whitespace is
/// collapsed and the result is cut at `max_chars` characters with `...`.
pub fn extract_plain_text(doc: &Document, max_chars: usize) -> String {
    let mut buffer = String::new();
    for block in &doc.blocks {
        collect_text(block, &mut buffer);
    }

    let collapsed = WHITESPACE_RE.replace_all(&buffer, " ");
    truncate_chars(collapsed.trim(), max_chars)
}

fn collect_text(node: &Node, out: &mut String) {
    match node.kind {
        NodeKind::Text => {
            if node.has_mark(&MarkKind::WikiLink) {
                out.push(WIKI_LINK_SENTINEL);
            }
            if let Some(text) = node.text.as_deref() {
                out.push_str(text);
            }
        }
        NodeKind::WikiLink => {
            out.push(WIKI_LINK_SENTINEL);
            if let Some(title) = node.attr_str("title") {
                out.push_str(title);
            }
        }
        NodeKind::HardBreak => out.push(' '),
        _ => {}
    }

    for child in node.children() {
        collect_text(child, out);
    }

    if node.kind.is_block() {
        out.push(' ');
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars).collect();
    let kept = truncated.trim_end().len();
    truncated.truncate(kept);
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_plain_text, Document, Mark, MarkKind, Node, NodeKind};
    use serde_json::json;

    #[test]
    fn legacy_plain_text_is_wrapped_in_a_paragraph() {
        let doc = Document::parse("just some words");
        assert_eq!(doc, Document::paragraph("just some words"));
    }

    #[test]
    fn structured_input_keeps_nodes_and_marks() {
        let raw = r#"{"type":"doc","content":[
            {"type":"heading","attrs":{"level":2},"content":[{"type":"text","text":"Title"}]},
            {"type":"paragraph","content":[
                {"type":"text","text":"bold","marks":[{"type":"bold"}]},
                {"type":"wikiLink","attrs":{"title":"Alpha","targetId":"a-1","exists":true}}
            ]}
        ]}"#;
        let doc = Document::parse(raw);
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.blocks[0].kind, NodeKind::Heading);
        let paragraph = &doc.blocks[1];
        assert!(paragraph.children()[0].has_mark(&MarkKind::Bold));
        assert_eq!(paragraph.children()[1].attr_str("targetId"), Some("a-1"));
    }

    #[test]
    fn malformed_or_non_doc_input_falls_back_to_empty() {
        assert!(Document::parse("{not json").is_empty());
        assert!(Document::parse(r#"{"type":"paragraph","content":[]}"#).is_empty());
        assert!(Document::parse(r#"{"content":[]}"#).is_empty());
        assert!(Document::parse("   ").is_empty());
    }

    #[test]
    fn doc_without_content_is_the_empty_document() {
        assert_eq!(Document::parse(r#"{"type":"doc"}"#), Document::empty());
    }

    #[test]
    fn unknown_kinds_survive_a_round_trip() {
        let raw = r#"{"type":"doc","content":[{"type":"taskList","content":[
            {"type":"text","text":"x","marks":[{"type":"highlight","attrs":{"color":"red"}}]}
        ]}]}"#;
        let doc = Document::parse(raw);
        assert_eq!(doc.blocks[0].kind, NodeKind::Other("taskList".to_string()));
        let reparsed = Document::parse(&doc.serialize().expect("serialize"));
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn serialize_always_writes_the_wrapped_form() {
        let encoded = Document::parse("legacy").serialize().expect("serialize");
        let value: serde_json::Value = serde_json::from_str(&encoded).expect("valid json");
        assert_eq!(
            value,
            json!({"type":"doc","content":[{"type":"paragraph","content":[{"type":"text","text":"legacy"}]}]})
        );
        assert_eq!(
            Document::empty().serialize().expect("serialize"),
            r#"{"type":"doc","content":[]}"#
        );
    }

    #[test]
    fn from_value_applies_the_same_rules() {
        assert_eq!(
            Document::from_value(&json!("plain")),
            Document::paragraph("plain")
        );
        assert!(Document::from_value(&json!(42)).is_empty());
        assert!(Document::from_value(&json!({"type":"doc","content":"nope"})).is_empty());
    }

    #[test]
    fn plain_text_marks_wiki_links_and_separates_blocks() {
        let doc = Document::from_blocks(vec![
            Node::heading(1, vec![Node::text("Intro")]),
            Node::paragraph(vec![
                Node::text("See "),
                Node::wiki_link("Alpha", "a-1", true),
                Node::text(" and "),
                Node::marked_text("Beta", vec![Mark::wiki_link("b-1")]),
            ]),
        ]);
        assert_eq!(extract_plain_text(&doc, 200), "Intro See →Alpha and →Beta");
    }

    #[test]
    fn plain_text_truncates_on_char_boundaries() {
        let doc = Document::paragraph("héllo wörld");
        assert_eq!(extract_plain_text(&doc, 5), "héllo...");
        assert_eq!(extract_plain_text(&doc, 50), "héllo wörld");
    }
}
