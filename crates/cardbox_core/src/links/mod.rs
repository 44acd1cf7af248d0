//! Link graph derivation.
//!
//! Outbound links are computed from content here; backlinks are computed on
//! demand by the store and never persisted.

pub mod extractor;
