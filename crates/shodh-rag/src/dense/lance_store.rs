//! LanceDB-backed [`DenseIndex`], adapted from the teacher's
//! `storage/lance_store.rs` and narrowed to the schema spec §3/§4.3 call
//! for: `id`, `doc_id`, `chunk_index`, `content`, `filename`, `vector`.

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{Array, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array, FixedSizeListArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::{DenseHit, DenseIndex};
use crate::types::MetadataFilter;

pub struct LanceStore {
    db: lancedb::Connection,
    dimension: usize,
    table_name: String,
}

impl LanceStore {
    pub async fn new(path: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("failed to connect to LanceDB")?;

        let store = Self {
            db,
            dimension,
            table_name: "chunks".to_string(),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("doc_id", DataType::Int64, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("filename", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), self.dimension as i32),
                true,
            ),
        ]))
    }

    async fn ensure_table(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.table_name) {
            return Ok(());
        }

        let schema = self.schema();
        let vector_array = self.vector_array(vec![vec![0.0f32; self.dimension]]);

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["__seed__"])) as Arc<dyn Array>,
                Arc::new(Int64Array::from(vec![-1i64])),
                Arc::new(UInt32Array::from(vec![0u32])),
                Arc::new(StringArray::from(vec![""])),
                Arc::new(StringArray::from(vec![""])),
                Arc::new(vector_array) as Arc<dyn Array>,
            ],
        )
        .context("failed to build seed record batch")?;

        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(&self.table_name, Box::new(batches))
            .execute()
            .await
            .context("failed to create chunks table")?;

        let table = self.db.open_table(&self.table_name).execute().await?;
        table.delete("id = '__seed__'").await.ok();
        Ok(())
    }

    fn vector_array(&self, vectors: Vec<Vec<f32>>) -> FixedSizeListArray {
        let flat: Vec<f32> = vectors.into_iter().flatten().collect();
        let values = Float32Array::from(flat);
        let field = Field::new("item", DataType::Float32, true);
        FixedSizeListArray::new(Arc::new(field), self.dimension as i32, Arc::new(values) as Arc<dyn Array>, None)
    }
}

#[async_trait]
impl DenseIndex for LanceStore {
    async fn add(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Vec<f32>>,
        contents: Vec<String>,
        doc_ids: Vec<i64>,
        chunk_indices: Vec<u32>,
        filenames: Vec<String>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        // Upsert semantics on id collision (spec §4.3): delete any existing
        // rows sharing an id before inserting the new batch.
        self.delete(&ids).await.ok();

        let table = self.db.open_table(&self.table_name).execute().await?;
        let schema = self.schema();
        let vector_array = self.vector_array(embeddings);

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)) as Arc<dyn Array>,
                Arc::new(Int64Array::from(doc_ids)),
                Arc::new(UInt32Array::from(chunk_indices)),
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(filenames)),
                Arc::new(vector_array) as Arc<dyn Array>,
            ],
        )
        .context("failed to build record batch")?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table.add(Box::new(reader)).execute().await.context("failed to insert chunks")?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<DenseHit>> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut query = table.query().nearest_to(vector)?.distance_type(lancedb::DistanceType::Cosine).limit(k);

        if let Some(f) = filter {
            if let Some(predicate) = f.to_predicate() {
                query = query.only_if(predicate);
            }
        }

        let results = query.execute().await.context("dense vector search failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits(&batches))
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = self.db.open_table(&self.table_name).execute().await?;
        let count_before = table.count_rows(None).await.unwrap_or(0);
        let id_list: Vec<String> = ids.iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect();
        let predicate = format!("id IN ({})", id_list.join(", "));
        table.delete(&predicate).await?;
        let count_after = table.count_rows(None).await.unwrap_or(0);
        Ok(count_before.saturating_sub(count_after))
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<usize> {
        let Some(predicate) = filter.to_predicate() else {
            return Ok(0);
        };
        let table = self.db.open_table(&self.table_name).execute().await?;
        let count_before = table.count_rows(None).await.unwrap_or(0);
        table.delete(&predicate).await?;
        let count_after = table.count_rows(None).await.unwrap_or(0);
        Ok(count_before.saturating_sub(count_after))
    }

    async fn get_by_doc(&self, doc_id: i64) -> Result<Vec<DenseHit>> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let predicate = format!("doc_id = {doc_id}");
        let results = table.query().only_if(predicate).execute().await.context("get_by_doc failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits(&batches))
    }

    async fn count(&self) -> Result<usize> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let total = table.count_rows(None).await?;
        let seed = table.count_rows(Some("doc_id = -1".to_string())).await.unwrap_or(0);
        Ok(total.saturating_sub(seed))
    }
}

fn extract_hits(batches: &[RecordBatch]) -> Vec<DenseHit> {
    let mut hits = Vec::new();
    for batch in batches {
        let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let contents = batch.column_by_name("content").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let doc_ids = batch.column_by_name("doc_id").and_then(|c| c.as_any().downcast_ref::<Int64Array>());
        let chunk_indices = batch.column_by_name("chunk_index").and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
        let filenames = batch.column_by_name("filename").and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(contents), Some(doc_ids)) = (ids, contents, doc_ids) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let external_id = ids.value(i).to_string();
            if external_id == "__seed__" {
                continue;
            }
            hits.push(DenseHit {
                external_id,
                content: contents.value(i).to_string(),
                doc_id: doc_ids.value(i),
                chunk_index: chunk_indices.map(|c| c.value(i)).unwrap_or(0),
                filename: filenames.map(|f| f.value(i).to_string()).unwrap_or_default(),
                distance: distances.map(|d| d.value(i)).unwrap_or(0.0),
            });
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec3(x: f32, y: f32, z: f32) -> Vec<f32> {
        let norm = (x * x + y * y + z * z).sqrt().max(1e-9);
        vec![x / norm, y / norm, z / norm]
    }

    #[tokio::test]
    async fn add_query_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::new(dir.path().to_str().unwrap(), 3).await.unwrap();

        store
            .add(
                vec!["chunk_1".to_string(), "chunk_2".to_string()],
                vec![vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0)],
                vec!["alpha content".to_string(), "beta content".to_string()],
                vec![10, 20],
                vec![0, 0],
                vec!["a.txt".to_string(), "b.txt".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 2);

        let hits = store.query(&vec3(1.0, 0.0, 0.0), 5, None).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].external_id, "chunk_1");

        let filter = MetadataFilter::doc(20);
        let filtered = store.query(&vec3(1.0, 0.0, 0.0), 5, Some(&filter)).await.unwrap();
        assert!(filtered.iter().all(|h| h.doc_id == 20));

        let deleted = store.delete(&["chunk_1".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn add_upserts_on_id_collision() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::new(dir.path().to_str().unwrap(), 3).await.unwrap();

        store
            .add(
                vec!["chunk_1".to_string()],
                vec![vec3(1.0, 0.0, 0.0)],
                vec!["first version".to_string()],
                vec![1],
                vec![0],
                vec!["a.txt".to_string()],
            )
            .await
            .unwrap();
        store
            .add(
                vec!["chunk_1".to_string()],
                vec![vec3(0.0, 1.0, 0.0)],
                vec!["second version".to_string()],
                vec![1],
                vec![0],
                vec!["a.txt".to_string()],
            )
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store.get_by_doc(1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "second version");
    }

    #[tokio::test]
    async fn delete_where_removes_by_doc_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::new(dir.path().to_str().unwrap(), 3).await.unwrap();

        store
            .add(
                vec!["chunk_1".to_string(), "chunk_2".to_string()],
                vec![vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0)],
                vec!["a".to_string(), "b".to_string()],
                vec![1, 2],
                vec![0, 0],
                vec!["a.txt".to_string(), "b.txt".to_string()],
            )
            .await
            .unwrap();

        let deleted = store.delete_where(&MetadataFilter::doc(1)).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
