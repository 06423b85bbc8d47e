//! Relational metadata store (spec §4.4).
//!
//! Tracks `Document` rows and their `Chunk` children, grounded in
//! `original_source/backend/app/models/base.py`'s SQLAlchemy schema
//! (cascade-delete chunks on document delete, status/processing_message/
//! processing_progress columns) implemented with the
//! `Arc<Mutex<Connection>>` + `rusqlite` idiom from
//! `cool-japan-legalis/crates/legalis-audit/src/storage/sqlite.rs`.

pub mod store;

pub use store::MetaStore;
