//! Diverse context assembly (spec §4.8).
//!
//! Implements the spec's literal pseudocode — score-threshold filtering,
//! Jaccard-redundancy dedup, a per-document cap, and a character budget —
//! rather than the teacher's MMR-with-lambda-decay diversity pass or the
//! reference's `_deduplicate_and_filter`'s cheaper `hash(content[:200])`
//! exact-dedup (both considered and rejected for this module: the spec
//! calls for near-duplicate suppression, which an exact-hash check misses).

pub mod builder;

pub use builder::{Citation, ContextBuilder, ContextBundle};
