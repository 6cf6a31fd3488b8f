//! helpdesk-rag - 고객지원 챗봇용 Q&A 하이브리드 검색 엔진
//!
//! 원본 Q&A 행에 대한 키워드 점수와 LanceDB 벡터 검색을
//! RRF로 통합해 사용자 질문에 가장 잘 맞는 레코드를 찾습니다.
//! 리인제스트 시 LLM으로 청크별 컨텍스트 문장을 붙여 임베딩할 수 있습니다.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod knowledge;
pub mod llm;

// Re-exports
pub use config::{get_data_dir, EmbedTarget, RetrievalConfig};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use knowledge::{
    rrf_fuse, ChunkEnricher, EnrichedChunk, HybridRetriever, HybridStats, IndexedRecord,
    KnowledgeRecord, KnowledgeStore, LanceVectorStore, MemoryRows, ReingestReport,
    RetrievalError, RowSource, SearchHit, VectorStore, VectorTable,
};
pub use llm::{ChatMessage, Completion, CompletionProvider, GeminiCompletion};
