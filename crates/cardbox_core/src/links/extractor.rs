//! Outbound link extraction from card content.
//!
//! # Responsibility
//! - Derive the ordered set of target ids a document references.
//! - Resolve legacy `[[title]]` text against known card titles.
//!
//! # Invariants
//! - Output ids are unique; position is the first occurrence in document order.
//! - Within one node, structured links (node attrs, marks) precede `[[title]]`
//!   matches from its text; children follow.
//! - Unresolvable titles produce no link and no error.
//! - Extraction is pure: same document + same index gives the same output.

use crate::model::card::{CardId, CardSummary};
use crate::model::document::{Document, MarkKind, Node, NodeKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static WIKI_TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]").expect("valid wiki title regex"));

const CARD_HREF_SCHEME: &str = "card://";

/// Exact title -> card id lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleIndex {
    by_title: HashMap<String, CardId>,
}

impl TitleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index from card metadata.
    ///
    /// Duplicate titles resolve to the earliest created card (ties by id).
    pub fn from_summaries<'a>(cards: impl IntoIterator<Item = &'a CardSummary>) -> Self {
        let mut ordered: Vec<&CardSummary> = cards.into_iter().collect();
        ordered.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });

        let mut index = Self::new();
        for card in ordered {
            index.insert(card.title.clone(), card.id.clone());
        }
        index
    }

    /// Adds a mapping unless the title is already taken.
    pub fn insert(&mut self, title: impl Into<String>, id: impl Into<CardId>) {
        self.by_title.entry(title.into()).or_insert_with(|| id.into());
    }

    pub fn resolve(&self, title: &str) -> Option<&CardId> {
        self.by_title.get(title)
    }

    pub fn len(&self) -> usize {
        self.by_title.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_title.is_empty()
    }
}

/// Extracts outbound link targets from `doc`.
pub fn extract_links(doc: &Document, titles: &TitleIndex) -> Vec<CardId> {
    let mut collector = LinkCollector::default();
    doc.walk(&mut |node| collector.visit(node, titles));
    collector.links
}

#[derive(Default)]
struct LinkCollector {
    links: Vec<CardId>,
    seen: HashSet<CardId>,
}

impl LinkCollector {
    fn visit(&mut self, node: &Node, titles: &TitleIndex) {
        if node.kind == NodeKind::WikiLink {
            let target = node
                .attr_str("targetId")
                .filter(|value| !value.is_empty())
                .or_else(|| node.attr_str("href"));
            if let Some(target) = target {
                self.push(target);
            }
        }

        if node.kind == NodeKind::Text {
            for mark in node.marks() {
                match mark.kind {
                    MarkKind::WikiLink => {
                        if let Some(target) = mark.attr_str("targetId") {
                            self.push(target);
                        }
                    }
                    MarkKind::Link => {
                        if let Some(target) = mark
                            .attr_str("href")
                            .and_then(|href| href.strip_prefix(CARD_HREF_SCHEME))
                        {
                            self.push(target);
                        }
                    }
                    _ => {}
                }
            }

            if let Some(text) = node.text.as_deref() {
                for captures in WIKI_TITLE_RE.captures_iter(text) {
                    let Some(title) = captures.get(1) else {
                        continue;
                    };
                    if let Some(id) = titles.resolve(title.as_str()) {
                        self.push(id);
                    }
                }
            }
        }
    }

    fn push(&mut self, id: &str) {
        if id.is_empty() || self.seen.contains(id) {
            return;
        }
        self.seen.insert(id.to_string());
        self.links.push(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_links, TitleIndex};
    use crate::model::card::{CardSummary, CardType};
    use crate::model::document::{Document, Mark, MarkKind, Node, NodeKind};
    use serde_json::{json, Map};

    fn titles(pairs: &[(&str, &str)]) -> TitleIndex {
        let mut index = TitleIndex::new();
        for (title, id) in pairs {
            index.insert(*title, *id);
        }
        index
    }

    fn summary(id: &str, title: &str, created_at: i64) -> CardSummary {
        CardSummary {
            id: id.to_string(),
            card_type: CardType::Permanent,
            title: title.to_string(),
            tags: vec![],
            links: vec![],
            source_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn atomic_nodes_marks_and_legacy_text_are_all_recognized() {
        let doc = Document::from_blocks(vec![Node::paragraph(vec![
            Node::wiki_link("Alpha", "a", true),
            Node::marked_text("beta", vec![Mark::wiki_link("b")]),
            Node::text("and [[Gamma]]"),
        ])]);
        let links = extract_links(&doc, &titles(&[("Gamma", "g")]));
        assert_eq!(links, vec!["a", "b", "g"]);
    }

    #[test]
    fn duplicate_targets_keep_first_position() {
        let doc = Document::from_blocks(vec![
            Node::paragraph(vec![Node::text("first [[Alpha]]")]),
            Node::paragraph(vec![
                Node::text("then [[Beta]]"),
                Node::wiki_link("Alpha", "a", true),
            ]),
        ]);
        let links = extract_links(&doc, &titles(&[("Alpha", "a"), ("Beta", "b")]));
        assert_eq!(links, vec!["a", "b"]);
    }

    #[test]
    fn structured_mark_precedes_text_pattern_in_the_same_node() {
        let doc = Document::from_blocks(vec![Node::paragraph(vec![Node::marked_text(
            "[[Beta]]",
            vec![Mark::wiki_link("a")],
        )])]);
        let links = extract_links(&doc, &titles(&[("Beta", "b")]));
        assert_eq!(links, vec!["a", "b"]);
    }

    #[test]
    fn unresolvable_titles_are_dropped() {
        let doc = Document::paragraph("See [[NoSuchCard]] and [[ alpha ]]");
        assert!(extract_links(&doc, &titles(&[("alpha", "a")])).is_empty());
    }

    #[test]
    fn extraction_is_idempotent() {
        let doc = Document::from_blocks(vec![Node::paragraph(vec![
            Node::text("[[B]] [[A]]"),
            Node::wiki_link("C", "c", false),
        ])]);
        let index = titles(&[("A", "a"), ("B", "b")]);
        let first = extract_links(&doc, &index);
        let second = extract_links(&doc, &index);
        assert_eq!(first, second);
        assert_eq!(first, vec!["b", "a", "c"]);
    }

    #[test]
    fn card_scheme_link_marks_and_href_fallback_count_as_links() {
        let mut href_attrs = Map::new();
        href_attrs.insert("href".to_string(), json!("card://x"));
        let external = Mark::new(MarkKind::Link);
        let internal = Mark {
            kind: MarkKind::Link,
            attrs: Some(href_attrs),
        };
        let legacy_node = Document::parse(
            r#"{"type":"doc","content":[{"type":"wikiLink","attrs":{"href":"y"}}]}"#,
        );

        let doc = Document::from_blocks(vec![
            Node::paragraph(vec![
                Node::marked_text("web", vec![external]),
                Node::marked_text("card", vec![internal]),
            ]),
            legacy_node.blocks[0].clone(),
        ]);
        assert_eq!(extract_links(&doc, &TitleIndex::new()), vec!["x", "y"]);
    }

    #[test]
    fn nested_blocks_are_walked_in_document_order() {
        let doc = Document::from_blocks(vec![Node::with_children(
            NodeKind::BulletList,
            vec![
                Node::with_children(
                    NodeKind::ListItem,
                    vec![Node::paragraph(vec![Node::text("[[Two]]")])],
                ),
                Node::with_children(
                    NodeKind::ListItem,
                    vec![Node::paragraph(vec![Node::text("[[One]]")])],
                ),
            ],
        )]);
        let links = extract_links(&doc, &titles(&[("One", "1"), ("Two", "2")]));
        assert_eq!(links, vec!["2", "1"]);
    }

    #[test]
    fn duplicate_titles_resolve_to_earliest_created_card() {
        let cards = [summary("late", "Same", 20), summary("early", "Same", 10)];
        let index = TitleIndex::from_summaries(cards.iter());
        assert_eq!(index.resolve("Same").map(String::as_str), Some("early"));
        assert_eq!(index.len(), 1);
    }
}
