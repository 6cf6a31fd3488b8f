//! Vector Store - 벡터 저장소 경계 트레이트
//!
//! 검색 엔진은 테이블 단위로만 벡터 저장소를 다룹니다:
//! 목록, 열기, 전체 생성, 삭제, 행 개수, 최근접 검색.
//! 증분 upsert는 없으며 리인제스트 때마다 새 세대 테이블을 만든 뒤 이전 세대를 삭제합니다.
//! 삭제된 테이블의 핸들은 더 이상 쓸 수 없습니다.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::record::IndexedRecord;

// ============================================================================
// Types
// ============================================================================

/// 최근접 검색 결과 행
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub question: String,
    pub answer: String,
    /// 저장소가 계산한 거리 (작을수록 유사)
    pub distance: f32,
}

// ============================================================================
// Traits
// ============================================================================

/// 열린 벡터 테이블 핸들
#[async_trait]
pub trait VectorTable: Send + Sync {
    /// 행 개수
    async fn count_rows(&self) -> Result<usize>;

    /// 거리 오름차순 최근접 `limit`개
    async fn vector_search(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorMatch>>;
}

/// 벡터 저장소 연결
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 저장소의 모든 테이블 이름
    async fn table_names(&self) -> Result<Vec<String>>;

    /// 테이블 열기, 없으면 `None`
    async fn open_table(&self, name: &str) -> Result<Option<Arc<dyn VectorTable>>>;

    /// 주어진 행으로 새 테이블 생성
    async fn create_table(
        &self,
        name: &str,
        rows: &[IndexedRecord],
    ) -> Result<Arc<dyn VectorTable>>;

    /// 테이블 삭제. 없던 테이블이면 `Ok(false)`
    async fn drop_table(&self, name: &str) -> Result<bool>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 제곱 L2 거리 (LanceDB 기본 메트릭과 동일)
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

// ============================================================================
// Mock
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
