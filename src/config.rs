//! 검색 엔진 설정
//!
//! 기본값은 `RetrievalConfig::default()`, 환경변수로 개별 항목을 덮어쓸 수 있습니다.
//!
//! | 환경변수 | 항목 |
//! |---|---|
//! | `HELPDESK_RAG_DISTANCE_THRESHOLD` | 벡터 히트 허용 최대 거리 |
//! | `HELPDESK_RAG_ENRICHMENT_CONCURRENCY` | 컨텍스트 생성 윈도우 크기 |
//! | `HELPDESK_RAG_TOP_K` | 기본 결과 개수 |
//! | `HELPDESK_RAG_TABLE` | 벡터 테이블 이름 접두사 |
//! | `HELPDESK_RAG_DOCUMENT_TITLE` | 컨텍스트 프롬프트에 들어갈 문서 제목 |
//! | `HELPDESK_RAG_EMBED_TARGET` | `question` 또는 `enriched` |

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::knowledge::DEFAULT_CONCURRENCY;

/// 데이터 디렉토리 경로 (~/.helpdesk-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".helpdesk-rag")
}

// ============================================================================
// EmbedTarget
// ============================================================================

/// 리인제스트 시 임베딩할 텍스트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedTarget {
    /// 원본 질문만 임베딩
    #[default]
    Question,
    /// LLM 컨텍스트 문장이 붙은 "질문: 답변" 임베딩
    Enriched,
}

impl FromStr for EmbedTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "question" => Ok(Self::Question),
            "enriched" => Ok(Self::Enriched),
            other => anyhow::bail!("Unknown embed target: {} (expected question|enriched)", other),
        }
    }
}

// ============================================================================
// RetrievalConfig
// ============================================================================

/// 하이브리드 검색 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// 벡터 히트로 인정할 최대 거리 (L2², LanceDB 기본 메트릭)
    pub distance_threshold: f32,
    /// 컨텍스트 생성 시 동시에 보내는 LLM 요청 수
    pub enrichment_concurrency: usize,
    /// `search`의 기본 결과 개수
    pub default_top_k: usize,
    /// RRF 상수 k
    pub rrf_k: f32,
    /// 벡터 테이블 이름 접두사, 실제 테이블은 `{table_name}_{세대}`
    pub table_name: String,
    /// 컨텍스트 프롬프트의 문서 제목
    pub document_title: String,
    pub embed_target: EmbedTarget,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            distance_threshold: 1.0,
            enrichment_concurrency: DEFAULT_CONCURRENCY,
            default_top_k: 3,
            rrf_k: 60.0,
            table_name: "knowledge".to_string(),
            document_title: "Customer support knowledge base".to_string(),
            embed_target: EmbedTarget::Question,
        }
    }
}

impl RetrievalConfig {
    /// 환경변수를 반영한 설정
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 키 조회 함수로 설정 구성
    ///
    /// 값이 없거나 파싱에 실패한 항목은 기본값을 유지합니다.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "HELPDESK_RAG_DISTANCE_THRESHOLD") {
            config.distance_threshold = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "HELPDESK_RAG_ENRICHMENT_CONCURRENCY") {
            // 0이면 윈도우가 만들어지지 않음
            config.enrichment_concurrency = v.max(1);
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "HELPDESK_RAG_TOP_K") {
            config.default_top_k = v.max(1);
        }
        if let Some(v) = lookup("HELPDESK_RAG_TABLE").filter(|v| !v.trim().is_empty()) {
            config.table_name = v.trim().to_string();
        }
        if let Some(v) = lookup("HELPDESK_RAG_DOCUMENT_TITLE").filter(|v| !v.trim().is_empty()) {
            config.document_title = v.trim().to_string();
        }
        if let Some(v) = parse_var(&lookup, "HELPDESK_RAG_EMBED_TARGET") {
            config.embed_target = v;
        }

        config
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Ignoring invalid {}={:?}: {}", key, raw, e);
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
