//! 하이브리드 검색 - 키워드 스코어링 + LanceDB RRF 통합
//!
//! RRF (Reciprocal Rank Fusion) 알고리즘으로
//! 키워드 검색과 벡터 검색을 통합합니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf
//!
//! 키워드 검색은 항상 원본 행 소스를, 벡터 검색은 마지막 리인제스트로 만든
//! 인덱스를 읽습니다. 리인제스트 전까지 두 결과가 달라질 수 있습니다.
//!
//! 인덱스는 `{table_name}_{세대}` 이름의 테이블로 저장됩니다. 리인제스트는 다음 세대
//! 테이블을 완성한 뒤 핸들을 교체하고 나서야 이전 세대를 삭제하므로, 생성이 실패해도
//! 이전 인덱스는 저장소와 메모리 양쪽에 그대로 남습니다. 시작 시에는 가장 높은 세대를 엽니다.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::config::{EmbedTarget, RetrievalConfig};
use crate::embedding::EmbeddingProvider;

use super::enrich::ChunkEnricher;
use super::error::RetrievalError;
use super::lexical::lexical_search;
use super::record::{EnrichedChunk, IndexedRecord, KnowledgeRecord, RowSource, SearchHit};
use super::vector::{VectorStore, VectorTable};

/// 키워드 전용 결과에 붙이는 중립 거리
///
/// 거리 임계값으로 신뢰도를 판단하는 호출자가 완벽한 벡터 매치로도,
/// 임계값 밖으로도 보지 않게 하는 중간값입니다.
pub const LEXICAL_NEUTRAL_DISTANCE: f32 = 0.5;

/// RRF 중복 판정 키 길이 (질문 앞 글자 수)
pub const DEDUP_KEY_CHARS: usize = 100;

// ============================================================================
// Types
// ============================================================================

/// 리인제스트 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReingestReport {
    /// 행 소스의 전체 행 수
    pub total_rows: usize,
    /// 질문과 답변이 모두 있는 행 수
    pub eligible_rows: usize,
    /// 인덱스에 들어간 행 수
    pub indexed: usize,
    /// 임베딩 실패로 건너뛴 행 수
    pub skipped: usize,
    /// 컨텍스트 보강에 성공한 행 수 (`EmbedTarget::Enriched`일 때만)
    pub enriched: usize,
}

/// 현재 검색에 쓰이는 인덱스 테이블
#[derive(Clone)]
struct ActiveIndex {
    name: String,
    table: Arc<dyn VectorTable>,
}

/// 하이브리드 저장소 통계
#[derive(Debug, Clone)]
pub struct HybridStats {
    pub record_count: usize,
    /// 로드된 인덱스의 행 수, 인덱스가 없으면 `None`
    pub indexed_count: Option<usize>,
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// 하이브리드 검색기
///
/// 활성 테이블 핸들은 `RwLock<Option<..>>` 하나로만 교체되며,
/// 질의는 핸들을 복제한 뒤 락을 놓고 검색하므로 교체 중인 상태를 보지 않습니다.
pub struct HybridRetriever {
    rows: Arc<dyn RowSource>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    enricher: Option<ChunkEnricher>,
    config: RetrievalConfig,
    table: RwLock<Option<ActiveIndex>>,
    reingest_guard: Mutex<()>,
}

impl HybridRetriever {
    /// 새 하이브리드 검색기 생성
    ///
    /// 인덱스는 비어있는 상태로 시작합니다. 기존 테이블을 쓰려면 [`Self::init`].
    pub fn new(
        rows: Arc<dyn RowSource>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            rows,
            store,
            embedder,
            enricher: None,
            config,
            table: RwLock::new(None),
            reingest_guard: Mutex::new(()),
        }
    }

    /// `EmbedTarget::Enriched` 리인제스트에 쓸 컨텍스트 보강기 지정
    pub fn with_enricher(mut self, enricher: ChunkEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// 인덱스 로드 여부
    pub async fn has_index(&self) -> bool {
        self.table.read().await.is_some()
    }

    /// 활성 인덱스 테이블 이름
    pub async fn index_table_name(&self) -> Option<String> {
        self.table.read().await.as_ref().map(|active| active.name.clone())
    }

    async fn current_table(&self) -> Option<Arc<dyn VectorTable>> {
        self.table
            .read()
            .await
            .as_ref()
            .map(|active| active.table.clone())
    }

    async fn swap_table(&self, active: Option<ActiveIndex>) {
        *self.table.write().await = active;
    }

    /// 저장소에 있는 이 검색기의 세대 테이블, 세대 오름차순
    async fn generation_tables(&self) -> anyhow::Result<Vec<(u64, String)>> {
        let base = &self.config.table_name;
        let mut tables: Vec<(u64, String)> = self
            .store
            .table_names()
            .await?
            .into_iter()
            .filter_map(|name| table_generation(base, &name).map(|g| (g, name)))
            .collect();
        tables.sort();
        Ok(tables)
    }

    /// 테이블 삭제, 실패는 로그만 남김
    async fn drop_tables(&self, names: Vec<String>) {
        for name in names {
            match self.store.drop_table(&name).await {
                Ok(_) => tracing::debug!("Dropped vector table '{}'", name),
                Err(e) => tracing::warn!("Failed to drop vector table '{}': {:#}", name, e),
            }
        }
    }

    /// 기존 인덱스 열기
    ///
    /// 실패해도 치명적이지 않으며, 다음 리인제스트 전까지 키워드 검색만 합니다.
    pub async fn init(&self) {
        let latest = match self.generation_tables().await {
            Ok(tables) => tables.into_iter().last(),
            Err(e) => {
                tracing::warn!("Failed to list vector tables, using keyword search only: {:#}", e);
                return;
            }
        };

        let Some((_, name)) = latest else {
            tracing::info!(
                "No vector index '{}' yet, using keyword search only",
                self.config.table_name
            );
            return;
        };

        match self.store.open_table(&name).await {
            Ok(Some(table)) => {
                match table.count_rows().await {
                    Ok(count) => tracing::info!("Loaded vector index '{}' ({} rows)", name, count),
                    Err(e) => tracing::warn!("Loaded vector index '{}' (count failed: {:#})", name, e),
                }
                self.swap_table(Some(ActiveIndex { name, table })).await;
            }
            Ok(None) => {
                tracing::info!("Vector index '{}' disappeared, using keyword search only", name);
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to open vector index '{}', using keyword search only: {:#}",
                    name,
                    e
                );
            }
        }
    }

    // ------------------------------------------------------------------------
    // Reingest
    // ------------------------------------------------------------------------

    /// 벡터 인덱스 전체 재구축
    ///
    /// 동시에 두 번 실행되지 않으며, 진행 중이면 즉시
    /// [`RetrievalError::ReingestInProgress`]를 반환합니다.
    /// 테이블 목록 조회나 생성이 실패하면 [`RetrievalError::Store`]를 반환하고
    /// 이전 인덱스는 그대로 둡니다.
    pub async fn reingest(&self) -> Result<ReingestReport, RetrievalError> {
        let _guard = self
            .reingest_guard
            .try_lock()
            .map_err(|_| RetrievalError::ReingestInProgress)?;

        let rows = self.rows.load_rows().map_err(RetrievalError::RowSource)?;
        let mut report = ReingestReport {
            total_rows: rows.len(),
            ..Default::default()
        };

        if rows.is_empty() {
            tracing::info!("No knowledge rows, clearing vector index");
            self.clear_index().await;
            return Ok(report);
        }

        let eligible: Vec<KnowledgeRecord> = rows.into_iter().filter(|r| r.is_complete()).collect();
        report.eligible_rows = eligible.len();

        let texts = self.embedding_texts(&eligible, &mut report).await;

        let mut indexed = Vec::with_capacity(eligible.len());
        for (record, text) in eligible.into_iter().zip(texts) {
            match self.embedder.embed(&text).await {
                Ok(vector) => indexed.push(IndexedRecord {
                    question: record.question,
                    answer: record.answer,
                    vector,
                }),
                Err(e) => {
                    report.skipped += 1;
                    tracing::warn!("Skipping {:?}: embedding failed: {:#}", record.question, e);
                }
            }
        }
        report.indexed = indexed.len();

        if indexed.is_empty() {
            tracing::warn!("No rows embedded successfully, clearing vector index");
            self.clear_index().await;
            return Ok(report);
        }

        let previous = self
            .generation_tables()
            .await
            .map_err(RetrievalError::Store)?;
        let generation = previous.last().map_or(1, |(g, _)| g + 1);
        let name = generation_table_name(&self.config.table_name, generation);

        let table = match self.store.create_table(&name, &indexed).await {
            Ok(table) => table,
            Err(e) => {
                // 부분적으로 만들어진 테이블이 다음 init에 잡히지 않도록
                self.drop_tables(vec![name]).await;
                return Err(RetrievalError::Store(e));
            }
        };
        self.swap_table(Some(ActiveIndex {
            name: name.clone(),
            table,
        }))
        .await;
        self.drop_tables(previous.into_iter().map(|(_, n)| n).collect())
            .await;

        tracing::info!(
            "Reingested '{}': {} indexed, {} skipped, {} rows total",
            name,
            report.indexed,
            report.skipped,
            report.total_rows
        );

        Ok(report)
    }

    /// 레코드별 임베딩 대상 텍스트
    async fn embedding_texts(
        &self,
        records: &[KnowledgeRecord],
        report: &mut ReingestReport,
    ) -> Vec<String> {
        match self.config.embed_target {
            EmbedTarget::Question => records.iter().map(|r| r.question.clone()).collect(),
            EmbedTarget::Enriched => {
                let chunks = match &self.enricher {
                    Some(enricher) => {
                        enricher
                            .enrich_batch(
                                records,
                                &self.config.document_title,
                                self.config.enrichment_concurrency,
                            )
                            .await
                    }
                    None => {
                        tracing::warn!("Enriched embedding requested without an enricher");
                        records
                            .iter()
                            .map(|r| EnrichedChunk::unenriched(r.original_content()))
                            .collect()
                    }
                };
                report.enriched = chunks.iter().filter(|c| c.enriched).count();
                chunks.into_iter().map(|c| c.contextual_content).collect()
            }
        }
    }

    /// 인덱스를 비움 (핸들 해제 + 모든 세대 테이블 삭제)
    async fn clear_index(&self) {
        self.swap_table(None).await;
        match self.generation_tables().await {
            Ok(tables) => {
                self.drop_tables(tables.into_iter().map(|(_, n)| n).collect())
                    .await
            }
            Err(e) => tracing::warn!("Failed to list vector tables: {:#}", e),
        }
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    /// 키워드 검색 (원본 행 대상)
    ///
    /// 행 소스 오류는 결과 없음으로 처리합니다.
    pub fn lexical_search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        match self.rows.load_rows() {
            Ok(rows) => lexical_search(&rows, query, top_k),
            Err(e) => {
                tracing::warn!("Keyword search unavailable: {:#}", e);
                vec![]
            }
        }
    }

    /// 벡터 검색
    ///
    /// 인덱스가 없거나 임베딩/저장소 오류가 나면 결과 없음.
    pub async fn vector_search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let Some(table) = self.current_table().await else {
            return vec![];
        };

        let vector = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Query embedding failed, skipping vector search: {:#}", e);
                return vec![];
            }
        };

        let matches = match table.vector_search(&vector, top_k).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Vector search failed: {:#}", e);
                return vec![];
            }
        };

        matches
            .into_iter()
            .filter(|m| m.distance <= self.config.distance_threshold)
            .map(|m| SearchHit {
                distance: Some(m.distance),
                ..SearchHit::new(m.question, m.answer)
            })
            .collect()
    }

    /// 하이브리드 검색
    ///
    /// 두 경로에서 각각 `top_k * 2`개 후보를 받아,
    /// 둘 다 있으면 RRF로 통합하고, 한쪽만 있으면 그쪽 상위 `top_k`개를 반환합니다.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchHit> {
        let candidates = top_k.saturating_mul(2);

        let (text_hits, vector_hits) = tokio::join!(
            async { self.lexical_search(query, candidates) },
            self.vector_search(query, candidates),
        );

        tracing::debug!(
            "Search {:?}: {} keyword hits, {} vector hits",
            query,
            text_hits.len(),
            vector_hits.len()
        );

        match (vector_hits.is_empty(), text_hits.is_empty()) {
            (false, false) => {
                let mut fused = rrf_fuse(&vector_hits, &text_hits, self.config.rrf_k);
                fused.truncate(top_k);
                fused
            }
            (false, true) => vector_hits.into_iter().take(top_k).collect(),
            (true, false) => with_neutral_distance(text_hits, top_k),
            (true, true) => vec![],
        }
    }

    /// 설정의 기본 개수로 검색
    pub async fn search_default(&self, query: &str) -> Vec<SearchHit> {
        self.search(query, self.config.default_top_k).await
    }

    /// 저장소 통계
    pub async fn stats(&self) -> anyhow::Result<HybridStats> {
        let record_count = self.rows.load_rows()?.len();
        let indexed_count = match self.current_table().await {
            Some(table) => Some(table.count_rows().await?),
            None => None,
        };

        Ok(HybridStats {
            record_count,
            indexed_count,
        })
    }
}

// ============================================================================
// Index tables
// ============================================================================

fn generation_table_name(base: &str, generation: u64) -> String {
    format!("{}_{}", base, generation)
}

/// `{base}_{n}` 이름이면 세대 번호 n
fn table_generation(base: &str, name: &str) -> Option<u64> {
    name.strip_prefix(base)?.strip_prefix('_')?.parse().ok()
}

// ============================================================================
// Keyword-only results
// ============================================================================

/// 키워드 결과 상위 `top_k`개에 중립 거리를 붙임
fn with_neutral_distance(text_hits: Vec<SearchHit>, top_k: usize) -> Vec<SearchHit> {
    text_hits
        .into_iter()
        .take(top_k)
        .map(|hit| SearchHit {
            distance: Some(LEXICAL_NEUTRAL_DISTANCE),
            ..hit
        })
        .collect()
}

/// 벡터 인덱스 없이 하는 검색
///
/// 인덱스가 없을 때의 [`HybridRetriever::search`]와 같은 결과를 돌려줍니다.
/// 임베딩 프로바이더를 만들 수 없는 호출자(API 키 없음)가 사용합니다.
pub fn keyword_only_search(rows: &[KnowledgeRecord], query: &str, top_k: usize) -> Vec<SearchHit> {
    with_neutral_distance(lexical_search(rows, query, top_k.saturating_mul(2)), top_k)
}

// ============================================================================
// RRF
// ============================================================================

/// RRF 중복 판정 키: 질문 앞 100글자
///
/// 앞 100글자가 같은 서로 다른 긴 질문은 하나로 합쳐집니다.
pub fn dedup_key(question: &str) -> String {
    question.chars().take(DEDUP_KEY_CHARS).collect()
}

/// RRF (Reciprocal Rank Fusion)
///
/// 각 목록의 0-based 순위 r에 `1 / (k + r + 1)`을 주고 키별로 합산합니다.
/// 벡터 결과를 먼저 넣으므로 같은 키의 내용은 벡터 쪽이 남습니다.
/// 정렬은 점수 내림차순, 동점은 먼저 들어온 순서입니다.
pub fn rrf_fuse(vector_hits: &[SearchHit], text_hits: &[SearchHit], k: f32) -> Vec<SearchHit> {
    let mut fused: Vec<(SearchHit, f32)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for hits in [vector_hits, text_hits] {
        for (rank, hit) in hits.iter().enumerate() {
            let contribution = 1.0 / (k + rank as f32 + 1.0);
            let key = dedup_key(&hit.question);
            match index.get(&key) {
                Some(&i) => fused[i].1 += contribution,
                None => {
                    index.insert(key, fused.len());
                    fused.push((hit.clone(), contribution));
                }
            }
        }
    }

    // sort_by는 안정 정렬이므로 동점은 삽입 순서 유지
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    fused
        .into_iter()
        .map(|(hit, score)| SearchHit {
            rrf_score: Some(score),
            ..hit
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::embedding::mock::MockEmbedding;
    use crate::knowledge::record::MemoryRows;
    use crate::knowledge::vector::mock::MemoryVectorStore;
    use crate::llm::mock::MockCompletion;

    const K: f32 = 60.0;

    fn hit(question: &str) -> SearchHit {
        SearchHit::new(question, format!("answer {}", question))
    }

    fn questions(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.question.as_str()).collect()
    }

    fn rec(q: &str, a: &str) -> KnowledgeRecord {
        KnowledgeRecord::new(q, a)
    }

    struct Fixture {
        rows: Arc<MemoryRows>,
        store: Arc<MemoryVectorStore>,
        embedder: Arc<MockEmbedding>,
        retriever: HybridRetriever,
    }

    fn fixture(rows: Vec<KnowledgeRecord>, embedder: MockEmbedding) -> Fixture {
        fixture_with(rows, embedder, RetrievalConfig::default())
    }

    fn fixture_with(
        rows: Vec<KnowledgeRecord>,
        embedder: MockEmbedding,
        config: RetrievalConfig,
    ) -> Fixture {
        let rows = Arc::new(MemoryRows::new(rows));
        let store = Arc::new(MemoryVectorStore::new());
        let embedder = Arc::new(embedder);
        let retriever = HybridRetriever::new(rows.clone(), store.clone(), embedder.clone(), config);
        Fixture {
            rows,
            store,
            embedder,
            retriever,
        }
    }

    /// 활성 인덱스 테이블에 저장된 질문들
    async fn indexed_questions(
        retriever: &HybridRetriever,
        store: &MemoryVectorStore,
    ) -> Vec<String> {
        let name = retriever.index_table_name().await.unwrap();
        store.questions(&name).unwrap()
    }

    /// 비밀번호/배송/환불 세 행, 각자 축 방향 벡터
    fn support_rows() -> (Vec<KnowledgeRecord>, MockEmbedding) {
        let rows = vec![
            rec("How do I reset my password?", "Use the reset link on the login page."),
            rec("How long does shipping take?", "Orders arrive in 3-5 days."),
            rec("Can I get a refund?", "Refunds are issued within 14 days."),
        ];
        let embedder = MockEmbedding::new(vec![0.0, 0.0, 0.0, 1.0])
            .with_vector("How do I reset my password?", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("How long does shipping take?", vec![0.0, 1.0, 0.0, 0.0])
            .with_vector("Can I get a refund?", vec![0.0, 0.0, 1.0, 0.0]);
        (rows, embedder)
    }

    // ------------------------------------------------------------------------
    // RRF
    // ------------------------------------------------------------------------

    #[test]
    fn test_rrf_reference_example() {
        let fused = rrf_fuse(&[hit("A"), hit("B")], &[hit("B"), hit("C")], K);

        assert_eq!(questions(&fused), vec!["B", "A", "C"]);
        let scores: Vec<f32> = fused.iter().map(|h| h.rrf_score.unwrap()).collect();
        assert!((scores[0] - 0.032514).abs() < 1e-5);
        assert!((scores[1] - 0.016393).abs() < 1e-5);
        assert!((scores[2] - 0.016129).abs() < 1e-5);
    }

    #[test]
    fn test_rrf_empty() {
        assert!(rrf_fuse(&[], &[], K).is_empty());
    }

    #[test]
    fn test_rrf_single_list_keeps_order() {
        let fused = rrf_fuse(&[hit("x"), hit("y"), hit("z")], &[], K);

        assert_eq!(questions(&fused), vec!["x", "y", "z"]);
        for (rank, h) in fused.iter().enumerate() {
            let expected = 1.0 / (K + rank as f32 + 1.0);
            assert!((h.rrf_score.unwrap() - expected).abs() < 1e-7);
        }
    }

    #[test]
    fn test_rrf_keys_are_union_without_duplicates() {
        let vector = [hit("a"), hit("b"), hit("c")];
        let text = [hit("c"), hit("d"), hit("a"), hit("e")];
        let fused = rrf_fuse(&vector, &text, K);

        let mut keys = questions(&fused);
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_rrf_vector_payload_wins() {
        let vector = [SearchHit {
            distance: Some(0.1),
            ..SearchHit::new("same", "vector answer")
        }];
        let text = [SearchHit {
            text_score: Some(12.0),
            ..SearchHit::new("same", "text answer")
        }];
        let fused = rrf_fuse(&vector, &text, K);

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].answer, "vector answer");
        assert_eq!(fused[0].distance, Some(0.1));
    }

    #[test]
    fn test_rrf_ties_keep_insertion_order() {
        // 둘 다 1위 -> 동점, 벡터 쪽이 먼저
        let fused = rrf_fuse(&[hit("v")], &[hit("t")], K);
        assert_eq!(questions(&fused), vec!["v", "t"]);
    }

    #[test]
    fn test_rrf_merges_shared_long_prefix() {
        let prefix = "x".repeat(DEDUP_KEY_CHARS);
        let fused = rrf_fuse(
            &[hit(&format!("{}-first", prefix))],
            &[hit(&format!("{}-second", prefix))],
            K,
        );
        assert_eq!(fused.len(), 1);
        assert!(fused[0].question.ends_with("-first"));
    }

    #[test]
    fn test_dedup_key_is_char_based() {
        let question = "ş".repeat(150);
        assert_eq!(dedup_key(&question).chars().count(), DEDUP_KEY_CHARS);
        assert_eq!(dedup_key("short"), "short");
    }

    // ------------------------------------------------------------------------
    // Reingest
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_reingest_builds_index() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);

        let report = f.retriever.reingest().await.unwrap();

        assert_eq!(report.total_rows, 3);
        assert_eq!(report.indexed, 3);
        assert_eq!(report.skipped, 0);
        assert!(f.retriever.has_index().await);
        let stats = f.retriever.stats().await.unwrap();
        assert_eq!(stats.indexed_count, Some(3));
        assert_eq!(stats.record_count, 3);
    }

    #[tokio::test]
    async fn test_reingest_embeds_raw_questions_by_default() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);

        f.retriever.reingest().await.unwrap();

        assert_eq!(
            f.embedder.calls(),
            vec![
                "How do I reset my password?",
                "How long does shipping take?",
                "Can I get a refund?",
            ]
        );
    }

    #[tokio::test]
    async fn test_reingest_skips_failed_embedding() {
        let rows = vec![rec("one", "1"), rec("two", "2"), rec("three", "3")];
        let f = fixture(rows, MockEmbedding::new(vec![1.0, 0.0]).failing_on("two"));

        let report = f.retriever.reingest().await.unwrap();

        assert_eq!(report.indexed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            indexed_questions(&f.retriever, &f.store).await,
            vec!["one".to_string(), "three".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reingest_ignores_incomplete_rows() {
        let rows = vec![rec("q", "a"), rec("no answer", ""), rec("", "no question")];
        let f = fixture(rows, MockEmbedding::new(vec![1.0]));

        let report = f.retriever.reingest().await.unwrap();

        assert_eq!(report.total_rows, 3);
        assert_eq!(report.eligible_rows, 1);
        assert_eq!(report.indexed, 1);
        assert_eq!(f.embedder.calls(), vec!["q"]);
    }

    #[tokio::test]
    async fn test_reingest_empty_rows_clears_index_and_search_still_works() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        f.rows.replace(vec![]).unwrap();
        let report = f.retriever.reingest().await.unwrap();

        assert_eq!(report, ReingestReport::default());
        assert!(!f.retriever.has_index().await);
        assert!(f.store.table_names().await.unwrap().is_empty());
        assert!(f.retriever.search("reset password", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_reingest_all_embeddings_fail_clears_index() {
        let rows = vec![rec("one", "1")];
        let f = fixture(rows, MockEmbedding::new(vec![1.0]).failing_on("one"));

        let report = f.retriever.reingest().await.unwrap();

        assert_eq!(report.indexed, 0);
        assert_eq!(report.skipped, 1);
        assert!(!f.retriever.has_index().await);
        assert_eq!(f.store.creates(), 0);

        // 키워드 검색으로만 동작
        let hits = f.retriever.search("one", 3).await;
        assert_eq!(questions(&hits), vec!["one"]);
        assert_eq!(hits[0].distance, Some(LEXICAL_NEUTRAL_DISTANCE));
    }

    #[tokio::test]
    async fn test_reingest_replaces_generation_table() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);

        f.retriever.reingest().await.unwrap();
        assert_eq!(f.retriever.index_table_name().await.as_deref(), Some("knowledge_1"));

        f.retriever.reingest().await.unwrap();
        assert_eq!(f.retriever.index_table_name().await.as_deref(), Some("knowledge_2"));
        assert_eq!(
            f.store.table_names().await.unwrap(),
            vec!["knowledge_2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reingest_create_failure_keeps_previous_index() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        f.store.set_fail_create(true);
        let err = f.retriever.reingest().await.unwrap_err();

        assert!(matches!(err, RetrievalError::Store(_)));
        assert!(f.retriever.has_index().await);
        assert_eq!(f.retriever.stats().await.unwrap().indexed_count, Some(3));
        // 이전 테이블이 저장소에 남아 있고 핸들로 계속 검색 가능
        assert_eq!(
            f.store.table_names().await.unwrap(),
            vec!["knowledge_1".to_string()]
        );
        let hits = f
            .retriever
            .vector_search("How do I reset my password?", 1)
            .await;
        assert_eq!(questions(&hits), vec!["How do I reset my password?"]);
    }

    #[tokio::test]
    async fn test_restart_after_failed_create_loads_previous_index() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        f.store.set_fail_create(true);
        assert!(f.retriever.reingest().await.is_err());

        let restarted = HybridRetriever::new(
            f.rows.clone(),
            f.store.clone(),
            f.embedder.clone(),
            RetrievalConfig::default(),
        );
        restarted.init().await;

        assert!(restarted.has_index().await);
        assert_eq!(restarted.stats().await.unwrap().indexed_count, Some(3));
        let hits = restarted.vector_search("Can I get a refund?", 1).await;
        assert_eq!(questions(&hits), vec!["Can I get a refund?"]);
    }

    #[tokio::test]
    async fn test_reingest_stale_table_drop_failure_is_not_fatal() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        f.store.set_fail_drop(true);
        f.retriever.reingest().await.unwrap();

        // 새 세대가 활성화되고 이전 세대는 남아 있음
        assert_eq!(f.retriever.index_table_name().await.as_deref(), Some("knowledge_2"));
        assert_eq!(f.store.table_names().await.unwrap().len(), 2);

        // 재시작하면 가장 높은 세대를 연다
        let restarted = HybridRetriever::new(
            f.rows.clone(),
            f.store.clone(),
            f.embedder.clone(),
            RetrievalConfig::default(),
        );
        restarted.init().await;
        assert_eq!(restarted.index_table_name().await.as_deref(), Some("knowledge_2"));

        // 다음 리인제스트에서 정리됨
        f.store.set_fail_drop(false);
        f.retriever.reingest().await.unwrap();
        assert_eq!(
            f.store.table_names().await.unwrap(),
            vec!["knowledge_3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_search_during_slow_reingest_uses_previous_index() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder.with_delay(Duration::from_millis(20)));
        f.retriever.reingest().await.unwrap();

        // 리인제스트는 임베딩 3번을 기다리고, 검색은 질의 임베딩 1번 뒤 이전 테이블을 조회
        let (report, hits) = tokio::join!(
            f.retriever.reingest(),
            f.retriever.search("How do I reset my password?", 3),
        );

        assert_eq!(report.unwrap().indexed, 3);
        assert_eq!(hits[0].question, "How do I reset my password?");
        // 벡터 경로가 살아 있었으므로 융합 결과에 벡터 거리가 실림
        assert!(hits[0].rrf_score.is_some());
        assert_eq!(hits[0].distance, Some(0.0));
        assert_eq!(f.retriever.index_table_name().await.as_deref(), Some("knowledge_2"));
    }

    #[test]
    fn test_table_generation_parsing() {
        assert_eq!(table_generation("knowledge", "knowledge_7"), Some(7));
        assert_eq!(table_generation("knowledge", "knowledge"), None);
        assert_eq!(table_generation("knowledge", "knowledge_faq_1"), None);
        assert_eq!(table_generation("knowledge", "other_1"), None);
        assert_eq!(generation_table_name("knowledge", 3), "knowledge_3");
    }

    #[tokio::test]
    async fn test_concurrent_reingest_is_rejected() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder.with_delay(Duration::from_millis(20)));

        let (first, second) = tokio::join!(f.retriever.reingest(), f.retriever.reingest());

        assert!(first.is_ok());
        assert!(matches!(second, Err(RetrievalError::ReingestInProgress)));
        assert_eq!(f.store.creates(), 1);

        // 끝난 뒤에는 다시 실행 가능
        assert!(f.retriever.reingest().await.is_ok());
    }

    #[tokio::test]
    async fn test_reingest_enriched_embeds_contextual_content() {
        let rows = vec![rec("Yazıcı nasıl kurulur?", "Ayarlar > Yazıcılar > Ekle")];
        let config = RetrievalConfig {
            embed_target: EmbedTarget::Enriched,
            ..Default::default()
        };
        let f = fixture_with(rows, MockEmbedding::new(vec![1.0, 0.0]), config);
        let retriever = f
            .retriever
            .with_enricher(ChunkEnricher::new(Arc::new(MockCompletion::replying(
                "Printer setup.",
            ))));

        let report = retriever.reingest().await.unwrap();

        assert_eq!(report.enriched, 1);
        assert_eq!(
            f.embedder.calls(),
            vec!["Printer setup.\nYazıcı nasıl kurulur?: Ayarlar > Yazıcılar > Ekle"]
        );
        // 인덱스에는 원본 질문/답변이 저장됨
        assert_eq!(
            indexed_questions(&retriever, &f.store).await,
            vec!["Yazıcı nasıl kurulur?".to_string()]
        );
    }

    #[tokio::test]
    async fn test_reingest_enriched_failure_indexes_unenriched() {
        let rows = vec![rec("Q1", "A1"), rec("Q2", "A2")];
        let config = RetrievalConfig {
            embed_target: EmbedTarget::Enriched,
            enrichment_concurrency: 1,
            ..Default::default()
        };
        let f = fixture_with(rows, MockEmbedding::new(vec![1.0]), config);
        let retriever = f
            .retriever
            .with_enricher(ChunkEnricher::new(Arc::new(MockCompletion::failing())));

        let report = retriever.reingest().await.unwrap();

        assert_eq!(report.indexed, 2);
        assert_eq!(report.enriched, 0);
        assert_eq!(f.embedder.calls(), vec!["Q1: A1", "Q2: A2"]);
    }

    // ------------------------------------------------------------------------
    // Init
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_init_loads_existing_table() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        // 같은 저장소를 쓰는 새 검색기
        let fresh = HybridRetriever::new(
            f.rows.clone(),
            f.store.clone(),
            f.embedder.clone(),
            RetrievalConfig::default(),
        );
        assert!(!fresh.has_index().await);

        fresh.init().await;
        assert!(fresh.has_index().await);
        assert_eq!(fresh.vector_search("How do I reset my password?", 1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_init_without_table_is_keyword_only() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);

        f.retriever.init().await;

        assert!(!f.retriever.has_index().await);
        let hits = f.retriever.search("refund", 3).await;
        assert_eq!(questions(&hits), vec!["Can I get a refund?"]);
        assert_eq!(hits[0].distance, Some(LEXICAL_NEUTRAL_DISTANCE));
        assert!(hits[0].text_score.is_some());
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_vector_search_applies_threshold() {
        let (rows, embedder) = support_rows();
        let embedder = embedder.with_vector("password help", vec![1.0, 0.0, 0.0, 0.0]);
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        // 다른 행과의 거리는 2.0 > 임계값 1.0
        let hits = f.retriever.vector_search("password help", 3).await;

        assert_eq!(questions(&hits), vec!["How do I reset my password?"]);
        assert_eq!(hits[0].distance, Some(0.0));
    }

    #[tokio::test]
    async fn test_vector_search_store_error_degrades() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();
        f.store.set_fail_search(true);

        assert!(f.retriever.vector_search("anything", 3).await.is_empty());

        // 키워드 결과로 대체
        let hits = f.retriever.search("shipping", 3).await;
        assert_eq!(questions(&hits), vec!["How long does shipping take?"]);
        assert_eq!(hits[0].distance, Some(LEXICAL_NEUTRAL_DISTANCE));
    }

    #[tokio::test]
    async fn test_vector_search_query_embedding_error_degrades() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder.failing_on("broken query"));
        f.retriever.reingest().await.unwrap();

        assert!(f.retriever.vector_search("broken query", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_search_fuses_both_paths() {
        let (rows, embedder) = support_rows();
        // 질의 벡터는 환불 행 방향
        let embedder = embedder.with_vector("reset refund", vec![0.0, 0.0, 1.0, 0.0]);
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        let hits = f.retriever.search("reset refund", 3).await;

        // 벡터: [refund], 키워드: [password(reset 2+1), refund(2+1)]
        // refund = 1/61 + 1/62, password = 1/61
        assert_eq!(
            questions(&hits),
            vec!["Can I get a refund?", "How do I reset my password?"]
        );
        assert!(hits.iter().all(|h| h.rrf_score.is_some()));
        assert_eq!(hits[0].distance, Some(0.0));
    }

    #[tokio::test]
    async fn test_search_vector_only() {
        let (rows, embedder) = support_rows();
        let embedder = embedder.with_vector("parcel eta", vec![0.0, 1.0, 0.0, 0.0]);
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        let hits = f.retriever.search("parcel eta", 3).await;

        assert_eq!(questions(&hits), vec!["How long does shipping take?"]);
        assert_eq!(hits[0].distance, Some(0.0));
        assert!(hits[0].rrf_score.is_none());
    }

    #[tokio::test]
    async fn test_search_nothing_matches() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        // 미등록 질의 벡터 [0,0,0,1] -> 모든 행과 거리 2.0
        assert!(f.retriever.search("xyz qwe", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_search_respects_top_k() {
        let rows: Vec<KnowledgeRecord> = (0..10)
            .map(|i| rec(&format!("order status {}", i), "check the orders page"))
            .collect();
        let f = fixture(rows, MockEmbedding::new(vec![1.0, 0.0]));
        f.retriever.reingest().await.unwrap();

        // 모든 행이 벡터 거리 0, 키워드도 모두 매치
        let hits = f.retriever.search("order", 3).await;
        assert_eq!(hits.len(), 3);

        let hits = f.retriever.search_default("order").await;
        assert_eq!(hits.len(), RetrievalConfig::default().default_top_k);
    }

    #[tokio::test]
    async fn test_search_returns_all_when_fewer_than_top_k() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);

        let hits = f.retriever.search("how", 5).await;
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_keyword_only_search_carries_neutral_distance() {
        let (rows, _) = support_rows();

        let hits = keyword_only_search(&rows, "shipping refund", 1);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].distance, Some(LEXICAL_NEUTRAL_DISTANCE));
        assert!(hits[0].text_score.is_some());
        assert!(keyword_only_search(&rows, "xyz", 3).is_empty());
    }

    #[tokio::test]
    async fn test_keyword_only_search_matches_search_without_index() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows.clone(), embedder);

        let from_engine = f.retriever.search("how refund", 2).await;
        let standalone = keyword_only_search(&rows, "how refund", 2);

        assert_eq!(questions(&from_engine), questions(&standalone));
        assert!(standalone
            .iter()
            .all(|h| h.distance == Some(LEXICAL_NEUTRAL_DISTANCE)));
    }

    #[tokio::test]
    async fn test_keyword_results_follow_current_rows_while_index_is_stale() {
        let (rows, embedder) = support_rows();
        let f = fixture(rows, embedder);
        f.retriever.reingest().await.unwrap();

        f.rows
            .replace(vec![rec("Do you ship abroad?", "Yes, worldwide.")])
            .unwrap();

        let text_hits = f.retriever.lexical_search("abroad", 5);
        assert_eq!(questions(&text_hits), vec!["Do you ship abroad?"]);
        // 리인제스트 전까지 인덱스는 예전 3행
        assert_eq!(f.retriever.stats().await.unwrap().indexed_count, Some(3));
    }
}
