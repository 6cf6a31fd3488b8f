//! 청크 컨텍스트 보강
//!
//! 각 Q&A 레코드에 대해 LLM에게 "이 청크가 무엇에 관한 것인지" 1~2문장을
//! 받아 원문 앞에 붙입니다. 짧은 레코드의 임베딩 재현율을 높이기 위한 용도입니다.
//!
//! 실패는 절대 인덱싱을 중단시키지 않습니다. 실패한 청크는 재시도 없이
//! 원문 그대로(`enriched = false`) 반환됩니다.

use std::sync::Arc;

use futures::future::join_all;

use crate::llm::{ChatMessage, CompletionProvider};

use super::record::{EnrichedChunk, KnowledgeRecord};

/// 컨텍스트 문장 최대 출력 토큰
pub const CONTEXT_MAX_TOKENS: u32 = 100;

/// 기본 동시 요청 윈도우
pub const DEFAULT_CONCURRENCY: usize = 3;

const CONTEXT_SYSTEM_PROMPT: &str =
    "You write one short context sentence for a knowledge-base chunk. \
     Reply with only that sentence, nothing else.";

/// 컨텍스트 생성 프롬프트 ({title}, {content} 치환)
const CONTEXT_PROMPT: &str = r#"<document>
{title}
</document>

Here is a chunk from the document above:
<chunk>
{content}
</chunk>

Write 1-2 short sentences that situate this chunk within the document to improve search retrieval. Answer only with the context."#;

/// 컨텍스트 보강기
#[derive(Clone)]
pub struct ChunkEnricher {
    llm: Arc<dyn CompletionProvider>,
}

impl ChunkEnricher {
    pub fn new(llm: Arc<dyn CompletionProvider>) -> Self {
        Self { llm }
    }

    fn build_prompt(document_title: &str, original_content: &str) -> String {
        CONTEXT_PROMPT
            .replace("{title}", document_title)
            .replace("{content}", original_content)
    }

    /// 단일 레코드 보강
    ///
    /// LLM 호출 실패나 빈 응답은 원문 그대로의 청크가 됩니다.
    pub async fn enrich_one(
        &self,
        record: &KnowledgeRecord,
        document_title: &str,
    ) -> EnrichedChunk {
        let original = record.original_content();
        let messages = [ChatMessage::user(Self::build_prompt(document_title, &original))];

        match self
            .llm
            .complete(&messages, CONTEXT_SYSTEM_PROMPT, CONTEXT_MAX_TOKENS)
            .await
        {
            Ok(completion) => {
                let context = completion.text.trim();
                if context.is_empty() {
                    tracing::warn!(
                        "Empty context from {} (finish_reason={}), indexing unenriched",
                        self.llm.name(),
                        completion.finish_reason
                    );
                    EnrichedChunk::unenriched(original)
                } else {
                    EnrichedChunk::with_context(context, original)
                }
            }
            Err(e) => {
                tracing::warn!("Context generation failed, indexing unenriched: {:#}", e);
                EnrichedChunk::unenriched(original)
            }
        }
    }

    /// 여러 레코드 보강
    ///
    /// `concurrency`개씩 윈도우로 나누어 윈도우 안에서는 동시에, 윈도우끼리는
    /// 순차로 처리합니다. 결과 순서는 입력 순서와 같습니다.
    pub async fn enrich_batch(
        &self,
        records: &[KnowledgeRecord],
        document_title: &str,
        concurrency: usize,
    ) -> Vec<EnrichedChunk> {
        let window = concurrency.max(1);
        let mut chunks = Vec::with_capacity(records.len());

        for (i, batch) in records.chunks(window).enumerate() {
            tracing::debug!(
                "Enriching window {}/{} ({} records)",
                i + 1,
                records.len().div_ceil(window),
                batch.len()
            );
            let enriched =
                join_all(batch.iter().map(|r| self.enrich_one(r, document_title))).await;
            chunks.extend(enriched);
        }

        let ok = chunks.iter().filter(|c| c.enriched).count();
        tracing::info!("Enriched {}/{} chunks", ok, chunks.len());

        chunks
    }
}

// ============================================================================
// Tests
// ============================================================================
