//! Hybrid dense+sparse retrieval (spec §4.6).
//!
//! Fusion shape grounded in the teacher's `search/hybrid.rs` (per-source
//! rank maps folded through Reciprocal Rank Fusion), simplified to the
//! plain weighted RRF spec §4.6 specifies rather than the teacher's
//! score-aware or linear-blend variants. The highlighted-preview windowing
//! is a direct port of `original_source/backend/app/services/search.py`'s
//! `_highlight_content` sliding-window-then-mark-matches algorithm, minus
//! the HTML `<span>` wrapping (this crate returns plain text; callers own
//! presentation).

pub mod hybrid;

pub use hybrid::HybridRetriever;
