//! Knowledge 모듈 - Q&A 지식베이스 하이브리드 검색
//!
//! - Store: SQLite Q&A 행 저장소 (원본)
//! - Lexical: 원본 행 대상 키워드 점수
//! - Lance: 벡터 인덱스 (ANN)
//! - Enrich: LLM 컨텍스트 문장 보강
//! - Hybrid: RRF 알고리즘으로 두 검색 결과 통합

mod enrich;
mod error;
mod hybrid;
mod lance;
mod lexical;
mod record;
mod store;
mod vector;

// Re-exports
pub use enrich::{ChunkEnricher, CONTEXT_MAX_TOKENS, DEFAULT_CONCURRENCY};
pub use error::RetrievalError;
pub use hybrid::{
    dedup_key, keyword_only_search, rrf_fuse, HybridRetriever, HybridStats, ReingestReport,
    DEDUP_KEY_CHARS, LEXICAL_NEUTRAL_DISTANCE,
};
pub use lance::{LanceTable, LanceVectorStore};
pub use lexical::lexical_search;
pub use record::{
    EnrichedChunk, IndexedRecord, KnowledgeRecord, MemoryRows, RowSource, SearchHit,
};
pub use store::{KnowledgeStore, StoreStats, StoredRecord};
pub use vector::{l2_squared, VectorMatch, VectorStore, VectorTable};
