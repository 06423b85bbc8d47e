//! Tagged, length-prefixed sparse-index snapshot format (spec §9: "a
//! tagged, length-prefixed serialization of `(entries, tokenizations,
//! id-to-position)` with a format version header, so cross-language
//! reimplementations can define a stable schema" — a deliberate departure
//! from the reference's Python-pickle `bm25_index.pkl`, which cannot be
//! read outside a Python process).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::SparseIndexError;

const MAGIC: &[u8; 4] = b"BM25";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub external_id: String,
    pub tokens: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// On-disk shape: `entries` carries its own tokenization, so `id_to_position`
/// is reconstructable on load without a separate section — the in-memory
/// `SparseIndex` rebuilds it from entry order, matching spec §4.2's
/// "entries + tokenizations + id index" description with the id index
/// derived rather than duplicated on disk.
pub fn save(path: &Path, entries: &[EntrySnapshot]) -> Result<(), SparseIndexError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());

    for entry in entries {
        write_string(&mut buf, &entry.external_id);

        buf.extend_from_slice(&(entry.tokens.len() as u32).to_le_bytes());
        for token in &entry.tokens {
            write_string(&mut buf, token);
        }

        buf.extend_from_slice(&(entry.metadata.len() as u32).to_le_bytes());
        for (k, v) in &entry.metadata {
            write_string(&mut buf, k);
            write_string(&mut buf, v);
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn load(path: &Path) -> Result<Vec<EntrySnapshot>, SparseIndexError> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;

    let mut cursor = Cursor::new(&buf);

    let magic = cursor.take(4)?;
    if magic != MAGIC.as_slice() {
        return Err(SparseIndexError::CorruptFormat(
            "missing BM25 snapshot magic bytes".to_string(),
        ));
    }

    let version = u32::from_le_bytes(cursor.take(4)?.try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(SparseIndexError::UnsupportedVersion {
            found: version,
            expected: FORMAT_VERSION,
        });
    }

    let entry_count = u64::from_le_bytes(cursor.take(8)?.try_into().unwrap()) as usize;
    let mut entries = Vec::with_capacity(entry_count.min(1 << 20));

    for _ in 0..entry_count {
        let external_id = read_string(&mut cursor)?;

        let token_count = u32::from_le_bytes(cursor.take(4)?.try_into().unwrap()) as usize;
        let mut tokens = Vec::with_capacity(token_count.min(1 << 20));
        for _ in 0..token_count {
            tokens.push(read_string(&mut cursor)?);
        }

        let meta_count = u32::from_le_bytes(cursor.take(4)?.try_into().unwrap()) as usize;
        let mut metadata = HashMap::with_capacity(meta_count);
        for _ in 0..meta_count {
            let k = read_string(&mut cursor)?;
            let v = read_string(&mut cursor)?;
            metadata.insert(k, v);
        }

        entries.push(EntrySnapshot {
            external_id,
            tokens,
            metadata,
        });
    }

    Ok(entries)
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn read_string(cursor: &mut Cursor<'_>) -> Result<String, SparseIndexError> {
    let len = u32::from_le_bytes(cursor.take(4)?.try_into().unwrap()) as usize;
    let bytes = cursor.take(len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| SparseIndexError::CorruptFormat(format!("invalid utf-8 string: {e}")))
}

/// Minimal bounds-checked byte cursor; avoids pulling in a serialization
/// crate for a format this crate owns end-to-end.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SparseIndexError> {
        if self.pos + n > self.data.len() {
            return Err(SparseIndexError::CorruptFormat(
                "unexpected end of snapshot".to_string(),
            ));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.bin");

        let mut meta = HashMap::new();
        meta.insert("doc_id".to_string(), "1".to_string());

        let entries = vec![EntrySnapshot {
            external_id: "chunk_1".to_string(),
            tokens: vec!["hello".to_string(), "world".to_string()],
            metadata: meta,
        }];

        save(&path, &entries).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].external_id, "chunk_1");
        assert_eq!(loaded[0].tokens, vec!["hello", "world"]);
        assert_eq!(loaded[0].metadata.get("doc_id"), Some(&"1".to_string()));
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, b"not a snapshot").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn rejects_future_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.bin");
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&999u32.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(&path, buf).unwrap();

        match load(&path) {
            Err(SparseIndexError::UnsupportedVersion { found, .. }) => assert_eq!(found, 999),
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }
}
