//! 검색 엔진이 호출자에게 돌려주는 에러
//!
//! 임베딩/컨텍스트 생성/벡터 검색 실패는 엔진 내부에서 로그 후 흡수되므로
//! 여기에 없습니다.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// 다른 리인제스트가 진행 중
    #[error("reingest already in progress")]
    ReingestInProgress,

    /// 원본 행을 읽지 못함
    #[error("failed to load knowledge rows: {0:#}")]
    RowSource(anyhow::Error),

    /// 테이블 삭제/생성 실패. 이전 인덱스는 그대로 유지됨
    #[error("vector store error: {0:#}")]
    Store(anyhow::Error),
}
