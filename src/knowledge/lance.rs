//! LanceDB Vector Store - Q&A 벡터 인덱스
//!
//! ANN (Approximate Nearest Neighbor) 검색으로 대용량 벡터에서도 빠른 검색을 지원합니다.
//! ref: https://lancedb.github.io/lancedb/
//!
//! 스키마: `question: Utf8, answer: Utf8, vector: FixedSizeList<Float32>[dim]`.
//! 차원은 테이블 생성 시 첫 행의 벡터 길이로 정해집니다.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::record::IndexedRecord;
use super::vector::{VectorMatch, VectorStore, VectorTable};

/// LanceDB가 검색 결과에 추가하는 거리 컬럼
const DISTANCE_COLUMN: &str = "_distance";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
pub struct LanceVectorStore {
    db: Connection,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db })
    }

    /// 벡터 테이블 스키마
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("question", DataType::Utf8, false),
            Field::new("answer", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 행들을 Arrow RecordBatch로 변환
    fn rows_to_batch(rows: &[IndexedRecord]) -> Result<RecordBatch> {
        let first = rows
            .first()
            .ok_or_else(|| anyhow::anyhow!("Cannot create batch from empty rows"))?;
        let dimension = first.vector.len();
        if dimension == 0 {
            anyhow::bail!("Cannot index zero-length vectors");
        }
        if let Some(bad) = rows.iter().find(|r| r.vector.len() != dimension) {
            anyhow::bail!(
                "Vector dimension mismatch for {:?}: expected {}, got {}",
                bad.question,
                dimension,
                bad.vector.len()
            );
        }

        let questions: Vec<&str> = rows.iter().map(|r| r.question.as_str()).collect();
        let answers: Vec<&str> = rows.iter().map(|r| r.answer.as_str()).collect();
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.vector.iter().copied()).collect();

        let dimension = i32::try_from(dimension).context("Vector dimension too large")?;
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vectors = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create vector array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(StringArray::from(questions)),
                Arc::new(StringArray::from(answers)),
                Arc::new(vectors),
            ],
        )
        .context("Failed to create RecordBatch")
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn table_names(&self) -> Result<Vec<String>> {
        self.db
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")
    }

    async fn open_table(&self, name: &str) -> Result<Option<Arc<dyn VectorTable>>> {
        match self.db.open_table(name).execute().await {
            Ok(table) => Ok(Some(Arc::new(LanceTable { table }))),
            Err(lancedb::Error::TableNotFound { .. }) => Ok(None),
            Err(e) => Err(e).context("Failed to open table"),
        }
    }

    async fn create_table(
        &self,
        name: &str,
        rows: &[IndexedRecord],
    ) -> Result<Arc<dyn VectorTable>> {
        let batch = Self::rows_to_batch(rows)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let table = self
            .db
            .create_table(name, batches)
            .execute()
            .await
            .context("Failed to create table")?;

        Ok(Arc::new(LanceTable { table }))
    }

    async fn drop_table(&self, name: &str) -> Result<bool> {
        match self.db.drop_table(name).await {
            Ok(()) => Ok(true),
            Err(lancedb::Error::TableNotFound { .. }) => Ok(false),
            Err(e) => Err(e).context("Failed to drop table"),
        }
    }
}

// ============================================================================
// LanceTable
// ============================================================================

/// 열린 LanceDB 테이블
pub struct LanceTable {
    table: lancedb::table::Table,
}

#[async_trait]
impl VectorTable for LanceTable {
    async fn count_rows(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .context("Failed to count rows")
    }

    async fn vector_search(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorMatch>> {
        let stream = self
            .table
            .vector_search(vector.to_vec())
            .context("Failed to create vector search")?
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        let mut matches = Vec::new();

        for batch in batches {
            let questions = string_column(&batch, "question")?;
            let answers = string_column(&batch, "answer")?;
            let distances = batch
                .column_by_name(DISTANCE_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing {} column", DISTANCE_COLUMN))?;

            for i in 0..batch.num_rows() {
                matches.push(VectorMatch {
                    question: questions.value(i).to_string(),
                    answer: answers.value(i).to_string(),
                    distance: distances.value(i),
                });
            }
        }

        Ok(matches)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

// ============================================================================
// Tests
// ============================================================================
