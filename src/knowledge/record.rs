//! 지식베이스 레코드 타입과 원본 행 소스

use std::sync::RwLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 원본 Q&A 레코드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub question: String,
    pub answer: String,
}

impl KnowledgeRecord {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// 질문과 답변이 모두 비어있지 않은지 (인덱싱/키워드 검색 대상)
    pub fn is_complete(&self) -> bool {
        !self.question.trim().is_empty() && !self.answer.trim().is_empty()
    }

    /// 임베딩/컨텍스트 생성용 원문
    ///
    /// `질문: 답변`, 한쪽이 비어있으면 나머지 한쪽만.
    pub fn original_content(&self) -> String {
        let question = self.question.trim();
        let answer = self.answer.trim();

        match (question.is_empty(), answer.is_empty()) {
            (false, false) => format!("{}: {}", question, answer),
            (true, _) => answer.to_string(),
            (false, true) => question.to_string(),
        }
    }
}

/// 컨텍스트 문장이 붙은 청크
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedChunk {
    pub original_content: String,
    /// 성공 시 `컨텍스트\n원문`, 실패 시 원문 그대로
    pub contextual_content: String,
    pub enriched: bool,
}

impl EnrichedChunk {
    /// 컨텍스트 없이 원문만 가진 청크
    pub fn unenriched(original_content: String) -> Self {
        Self {
            contextual_content: original_content.clone(),
            original_content,
            enriched: false,
        }
    }

    pub fn with_context(context: &str, original_content: String) -> Self {
        Self {
            contextual_content: format!("{}\n{}", context, original_content),
            original_content,
            enriched: true,
        }
    }
}

/// 벡터 테이블 행
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRecord {
    pub question: String,
    pub answer: String,
    pub vector: Vec<f32>,
}

/// 검색 결과
///
/// 어느 경로에서 나왔는지에 따라 점수 필드가 채워집니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub question: String,
    pub answer: String,
    /// 벡터 거리 (작을수록 유사), 키워드 전용 결과는 중립값
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    /// 키워드 점수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_score: Option<f32>,
    /// RRF 통합 점수
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrf_score: Option<f32>,
}

impl SearchHit {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            distance: None,
            text_score: None,
            rrf_score: None,
        }
    }
}

// ============================================================================
// RowSource
// ============================================================================

/// 원본 Q&A 행 소스
///
/// 키워드 검색은 매 질의마다, 리인제스트는 매 실행마다 전체 행을 다시 읽습니다.
pub trait RowSource: Send + Sync {
    fn load_rows(&self) -> Result<Vec<KnowledgeRecord>>;
}

/// 메모리 행 소스
#[derive(Debug, Default)]
pub struct MemoryRows {
    rows: RwLock<Vec<KnowledgeRecord>>,
}

impl MemoryRows {
    pub fn new(rows: Vec<KnowledgeRecord>) -> Self {
        Self {
            rows: RwLock::new(rows),
        }
    }

    /// 전체 행 교체
    pub fn replace(&self, rows: Vec<KnowledgeRecord>) -> Result<()> {
        let mut guard = self
            .rows
            .write()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        *guard = rows;
        Ok(())
    }
}

impl RowSource for MemoryRows {
    fn load_rows(&self) -> Result<Vec<KnowledgeRecord>> {
        let guard = self
            .rows
            .read()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        Ok(guard.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================
