//! Domain model for cards and their structured content.
//!
//! # Responsibility
//! - Define canonical data structures shared by store, extractor and backends.
//! - Own the content decode/encode boundary so the rest of core sees one shape.
//!
//! # Invariants
//! - Every card is identified by a stable `CardId`.
//! - Content is always held as a `Document`, never as raw text.

pub mod card;
pub mod document;
