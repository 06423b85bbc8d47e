use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::MetaStoreError;
use crate::types::{Chunk, Document, DocumentStatus};

/// Document + chunk metadata, backed by a single SQLite connection shared
/// across callers (spec §4.4). `replace_chunks` is the transactional
/// add/remove/keep write `IndexSynchronizer` drives (spec §4.5).
pub struct MetaStore {
    conn: Arc<Mutex<Connection>>,
}

impl MetaStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MetaStoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, MetaStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), MetaStoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE IF NOT EXISTS documents (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 filename TEXT NOT NULL,
                 title TEXT,
                 file_type TEXT NOT NULL,
                 file_path TEXT NOT NULL,
                 file_size INTEGER NOT NULL DEFAULT 0,
                 content TEXT,
                 metadata_json TEXT NOT NULL DEFAULT '{}',
                 status TEXT NOT NULL DEFAULT 'pending',
                 processing_message TEXT,
                 processing_progress REAL NOT NULL DEFAULT 0.0,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS chunks (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                 chunk_index INTEGER NOT NULL,
                 content TEXT NOT NULL,
                 start_char INTEGER,
                 end_char INTEGER,
                 metadata_json TEXT NOT NULL DEFAULT '{}'
             );
             CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id);",
        )?;
        Ok(())
    }

    pub fn create_document(
        &self,
        filename: &str,
        file_type: &str,
        file_path: &str,
        file_size: u64,
    ) -> Result<i64, MetaStoreError> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO documents (filename, file_type, file_path, file_size, status, processing_progress, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', 0.0, ?5, ?5)",
            params![filename, file_type, file_path, file_size as i64, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_document(&self, document_id: i64) -> Result<Document, MetaStoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, filename, title, file_type, file_path, file_size, content,
                    metadata_json, status, processing_message, processing_progress, created_at, updated_at
             FROM documents WHERE id = ?1",
            params![document_id],
            row_to_document,
        )
        .optional()?
        .ok_or(MetaStoreError::DocumentNotFound(document_id))
    }

    pub fn list_documents(&self) -> Result<Vec<Document>, MetaStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, filename, title, file_type, file_path, file_size, content,
                    metadata_json, status, processing_message, processing_progress, created_at, updated_at
             FROM documents ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_document)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(MetaStoreError::from)
    }

    /// Update status/message/progress in one statement (spec §4.10 status
    /// transitions). Callers are responsible for only moving status forward.
    pub fn update_status(
        &self,
        document_id: i64,
        status: DocumentStatus,
        message: Option<&str>,
        progress: f32,
    ) -> Result<(), MetaStoreError> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE documents SET status = ?1, processing_message = ?2, processing_progress = ?3, updated_at = ?4 WHERE id = ?5",
            params![status.as_str(), message, progress, now, document_id],
        )?;
        if changed == 0 {
            return Err(MetaStoreError::DocumentNotFound(document_id));
        }
        Ok(())
    }

    pub fn update_content_and_title(
        &self,
        document_id: i64,
        content: &str,
        title: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<(), MetaStoreError> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().to_rfc3339();
        let metadata_json = serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string());
        let changed = conn.execute(
            "UPDATE documents SET content = ?1, title = ?2, metadata_json = ?3, updated_at = ?4 WHERE id = ?5",
            params![content, title, metadata_json, now, document_id],
        )?;
        if changed == 0 {
            return Err(MetaStoreError::DocumentNotFound(document_id));
        }
        Ok(())
    }

    /// Cascade-delete a document and all its chunks (spec §3 invariant I2,
    /// `ON DELETE CASCADE`).
    pub fn delete_document(&self, document_id: i64) -> Result<(), MetaStoreError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM documents WHERE id = ?1", params![document_id])?;
        Ok(())
    }

    /// Fetch a single chunk alongside its owning document's filename, for
    /// the retrieval path (spec §4.6), which needs both to build a
    /// `SearchResult`.
    pub fn get_chunk_with_filename(&self, chunk_id: i64) -> Result<(Chunk, String), MetaStoreError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT c.id, c.document_id, c.chunk_index, c.content, c.start_char, c.end_char, c.metadata_json,
                    d.filename
             FROM chunks c JOIN documents d ON d.id = c.document_id
             WHERE c.id = ?1",
            params![chunk_id],
            |row| {
                let chunk = row_to_chunk(row)?;
                let filename: String = row.get(7)?;
                Ok((chunk, filename))
            },
        )
        .optional()?
        .ok_or(MetaStoreError::DocumentNotFound(chunk_id))
    }

    pub fn chunks_for_document(&self, document_id: i64) -> Result<Vec<Chunk>, MetaStoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, document_id, chunk_index, content, start_char, end_char, metadata_json
             FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
        )?;
        let rows = stmt.query_map(params![document_id], row_to_chunk)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(MetaStoreError::from)
    }

    pub fn total_chunk_count(&self) -> Result<usize, MetaStoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn completed_document_count(&self) -> Result<usize, MetaStoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE status = 'completed'",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn document_count(&self) -> Result<usize, MetaStoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete `removed` chunk ids, insert `added` chunks, and update
    /// `chunk_index` for `kept` chunks whose position moved, all in one
    /// transaction (spec §4.5 `sync_document`). Returns the newly inserted
    /// chunks with their assigned ids, in the same order as `added`.
    pub fn replace_chunks(
        &self,
        document_id: i64,
        removed_ids: &[i64],
        added: &[(u32, String, Option<usize>, Option<usize>)],
        kept_reindex: &[(i64, u32)],
    ) -> Result<Vec<Chunk>, MetaStoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        for id in removed_ids {
            tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
        }

        let mut inserted = Vec::with_capacity(added.len());
        for (chunk_index, content, start_char, end_char) in added {
            tx.execute(
                "INSERT INTO chunks (document_id, chunk_index, content, start_char, end_char)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    document_id,
                    chunk_index,
                    content,
                    start_char.map(|v| v as i64),
                    end_char.map(|v| v as i64)
                ],
            )?;
            let id = tx.last_insert_rowid();
            inserted.push(Chunk {
                id,
                document_id,
                chunk_index: *chunk_index,
                content: content.clone(),
                start_char: *start_char,
                end_char: *end_char,
                metadata: HashMap::new(),
            });
        }

        for (chunk_id, new_index) in kept_reindex {
            tx.execute(
                "UPDATE chunks SET chunk_index = ?1 WHERE id = ?2",
                params![new_index, chunk_id],
            )?;
        }

        tx.commit()?;
        Ok(inserted)
    }
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let metadata_json: String = row.get(7)?;
    let status_str: String = row.get(8)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    Ok(Document {
        id: row.get(0)?,
        filename: row.get(1)?,
        title: row.get(2)?,
        file_type: row.get(3)?,
        file_path: row.get(4)?,
        file_size: row.get::<_, i64>(5)? as u64,
        content: row.get(6)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        status: DocumentStatus::from_str(&status_str).unwrap_or(DocumentStatus::Pending),
        processing_message: row.get(9)?,
        processing_progress: row.get(10)?,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

fn parse_timestamp(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let metadata_json: String = row.get(6)?;
    Ok(Chunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as u32,
        content: row.get(3)?,
        start_char: row.get::<_, Option<i64>>(4)?.map(|v| v as usize),
        end_char: row.get::<_, Option<i64>>(5)?.map(|v| v as usize),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_fetch_document_round_trips() {
        let store = MetaStore::in_memory().unwrap();
        let id = store.create_document("a.txt", "text/plain", "/tmp/a.txt", 42).unwrap();
        let doc = store.get_document(id).unwrap();
        assert_eq!(doc.filename, "a.txt");
        assert_eq!(doc.status, DocumentStatus::Pending);
        assert_eq!(doc.file_size, 42);
    }

    #[test]
    fn get_missing_document_errors() {
        let store = MetaStore::in_memory().unwrap();
        assert!(matches!(
            store.get_document(999),
            Err(MetaStoreError::DocumentNotFound(999))
        ));
    }

    #[test]
    fn update_status_moves_progress_forward() {
        let store = MetaStore::in_memory().unwrap();
        let id = store.create_document("a.txt", "text/plain", "/tmp/a.txt", 1).unwrap();
        store
            .update_status(id, DocumentStatus::Parsing, Some("parsing"), 10.0)
            .unwrap();
        let doc = store.get_document(id).unwrap();
        assert_eq!(doc.status, DocumentStatus::Parsing);
        assert_eq!(doc.processing_message.as_deref(), Some("parsing"));
    }

    #[test]
    fn deleting_document_cascades_to_chunks() {
        let store = MetaStore::in_memory().unwrap();
        let id = store.create_document("a.txt", "text/plain", "/tmp/a.txt", 1).unwrap();
        store
            .replace_chunks(id, &[], &[(0, "hello".to_string(), Some(0), Some(5))], &[])
            .unwrap();
        assert_eq!(store.chunks_for_document(id).unwrap().len(), 1);

        store.delete_document(id).unwrap();
        assert_eq!(store.chunks_for_document(id).unwrap().len(), 0);
    }

    #[test]
    fn replace_chunks_adds_removes_and_reindexes_in_one_transaction() {
        let store = MetaStore::in_memory().unwrap();
        let id = store.create_document("a.txt", "text/plain", "/tmp/a.txt", 1).unwrap();
        let inserted = store
            .replace_chunks(
                id,
                &[],
                &[
                    (0, "first".to_string(), Some(0), Some(5)),
                    (1, "second".to_string(), Some(5), Some(11)),
                ],
                &[],
            )
            .unwrap();
        assert_eq!(inserted.len(), 2);

        let keep_id = inserted[1].id;
        store
            .replace_chunks(id, &[inserted[0].id], &[], &[(keep_id, 0)])
            .unwrap();

        let remaining = store.chunks_for_document(id).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].chunk_index, 0);
        assert_eq!(remaining[0].content, "second");
    }
}
