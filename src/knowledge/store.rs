//! Knowledge Store - rusqlite 기반 Q&A 행 저장소
//!
//! 챗봇 지식베이스의 원본(source of truth)입니다.
//! 검색 엔진은 이 저장소를 읽기만 하며, 키워드 검색은 벡터 인덱스가
//! 아니라 항상 여기서 읽은 현재 행을 대상으로 합니다.
//!
//! 저장 위치: ~/.helpdesk-rag/knowledge.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::Serialize;

use crate::config::get_data_dir;

use super::record::{KnowledgeRecord, RowSource};

// ============================================================================
// Types
// ============================================================================

/// 저장된 Q&A 행
#[derive(Debug, Clone, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub question: String,
    pub answer: String,
    pub created_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub record_count: usize,
    /// 질문 또는 답변이 비어 있어 검색/인덱싱에서 제외되는 행 수
    pub incomplete_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// SQLite Q&A 저장소
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 기본 위치에서 열기 (~/.helpdesk-rag/knowledge.db)
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join("knowledge.db"))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS qa_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create qa_records table")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 행 추가
    pub fn add_record(&self, record: &KnowledgeRecord) -> Result<i64> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO qa_records (question, answer, created_at) VALUES (?1, ?2, ?3)",
            params![record.question, record.answer, Utc::now().to_rfc3339()],
        )
        .context("Failed to insert record")?;

        Ok(conn.last_insert_rowid())
    }

    /// 여러 행을 한 트랜잭션으로 가져오기
    ///
    /// `replace`가 true면 기존 행을 모두 지운 뒤 넣습니다.
    pub fn import_records(&self, records: &[KnowledgeRecord], replace: bool) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        if replace {
            tx.execute("DELETE FROM qa_records", [])
                .context("Failed to clear records")?;
        }

        let now = Utc::now().to_rfc3339();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO qa_records (question, answer, created_at) VALUES (?1, ?2, ?3)",
            )?;
            for record in records {
                stmt.execute(params![record.question, record.answer, now])
                    .context("Failed to insert record")?;
            }
        }

        tx.commit().context("Failed to commit import")?;
        tracing::info!("Imported {} records (replace={})", records.len(), replace);

        Ok(records.len())
    }

    /// ID 순 행 목록
    pub fn list_records(&self, limit: usize) -> Result<Vec<StoredRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, question, answer, created_at FROM qa_records ORDER BY id LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read records")?;

        Ok(rows)
    }

    /// 행 삭제
    pub fn delete_record(&self, id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM qa_records WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM qa_records", [], |row| row.get(0))
            .context("Failed to count records")?;

        let incomplete: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM qa_records WHERE TRIM(question) = '' OR TRIM(answer) = ''",
                [],
                |row| row.get(0),
            )
            .context("Failed to count incomplete records")?;

        Ok(StoreStats {
            record_count: count as usize,
            incomplete_count: incomplete as usize,
            db_path: self.db_path.clone(),
        })
    }
}

impl RowSource for KnowledgeStore {
    fn load_rows(&self) -> Result<Vec<KnowledgeRecord>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT question, answer FROM qa_records ORDER BY id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(KnowledgeRecord {
                    question: row.get(0)?,
                    answer: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load rows")?;

        Ok(rows)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn map_row(row: &Row<'_>) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        id: row.get(0)?,
        question: row.get(1)?,
        answer: row.get(2)?,
        created_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
