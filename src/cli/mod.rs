//! CLI 모듈
//!
//! helpdesk-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{get_data_dir, EmbedTarget, RetrievalConfig};
use crate::embedding::{has_api_key, GeminiEmbedding};
use crate::knowledge::{
    keyword_only_search, ChunkEnricher, HybridRetriever, KnowledgeRecord, KnowledgeStore,
    LanceVectorStore, RowSource, SearchHit,
};
use crate::llm::GeminiCompletion;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "helpdesk-rag")]
#[command(version, about = "고객지원 Q&A 하이브리드 검색 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// JSON 파일([{"question", "answer"}])에서 Q&A 행 가져오기
    Import {
        /// 가져올 JSON 파일
        #[arg(short, long)]
        file: PathBuf,

        /// 기존 행을 모두 지우고 가져오기
        #[arg(long)]
        replace: bool,
    },

    /// Q&A 행 하나 추가
    Add {
        #[arg(short, long)]
        question: String,

        #[arg(short, long)]
        answer: String,
    },

    /// 저장된 Q&A 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Q&A 행 삭제
    Delete {
        /// 삭제할 행 ID
        #[arg(short, long)]
        id: i64,
    },

    /// 벡터 인덱스 전체 재구축
    Reingest {
        /// 컨텍스트 프롬프트의 문서 제목
        #[arg(short, long)]
        title: Option<String>,

        /// LLM 컨텍스트 문장을 붙여 임베딩
        #[arg(long)]
        enriched: bool,
    },

    /// 지식베이스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 (기본: 설정값)
        #[arg(short, long)]
        limit: Option<usize>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RetrievalConfig::from_env();

    match cli.command {
        Commands::Import { file, replace } => cmd_import(&file, replace),
        Commands::Add { question, answer } => cmd_add(question, answer),
        Commands::List { limit } => cmd_list(limit),
        Commands::Delete { id } => cmd_delete(id),
        Commands::Reingest { title, enriched } => {
            let mut config = config;
            if let Some(title) = title {
                config.document_title = title;
            }
            if enriched {
                config.embed_target = EmbedTarget::Enriched;
            }
            cmd_reingest(config).await
        }
        Commands::Query { query, limit, json } => {
            let limit = limit.unwrap_or(config.default_top_k);
            cmd_query(&query, limit, json, config).await
        }
        Commands::Status => cmd_status(config).await,
    }
}

/// 기본 데이터 디렉토리로 검색기 구성
async fn open_retriever(
    store: Arc<KnowledgeStore>,
    config: RetrievalConfig,
) -> Result<HybridRetriever> {
    let vectors = LanceVectorStore::open(&get_data_dir().join("vectors.lance"))
        .await
        .context("LanceDB 열기 실패")?;
    let embedder = GeminiEmbedding::from_env().context("임베딩 프로바이더 생성 실패")?;

    let enrich = config.embed_target == EmbedTarget::Enriched;
    let mut retriever = HybridRetriever::new(store, Arc::new(vectors), Arc::new(embedder), config);

    if enrich {
        let llm = GeminiCompletion::from_env().context("LLM 프로바이더 생성 실패")?;
        retriever = retriever.with_enricher(ChunkEnricher::new(Arc::new(llm)));
    }

    Ok(retriever)
}

fn open_store() -> Result<Arc<KnowledgeStore>> {
    Ok(Arc::new(
        KnowledgeStore::open_default().context("KnowledgeStore 열기 실패")?,
    ))
}

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

/// JSON 파일 가져오기 (import)
fn cmd_import(file: &Path, replace: bool) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("파일 읽기 실패: {:?}", file))?;
    let records: Vec<KnowledgeRecord> =
        serde_json::from_str(&raw).context("JSON 파싱 실패 (형식: [{\"question\", \"answer\"}])")?;

    if records.is_empty() {
        println!("[!] 가져올 행이 없습니다.");
        return Ok(());
    }

    let incomplete = records.iter().filter(|r| !r.is_complete()).count();
    let store = open_store()?;
    let imported = store.import_records(&records, replace)?;

    println!("[OK] {} 행을 가져왔습니다{}", imported, if replace { " (기존 행 교체)" } else { "" });
    if incomplete > 0 {
        println!("[!] 질문 또는 답변이 빈 행 {} 개는 검색에서 제외됩니다", incomplete);
    }
    println!("    벡터 인덱스 반영: helpdesk-rag reingest");

    Ok(())
}

/// 행 추가 (add)
fn cmd_add(question: String, answer: String) -> Result<()> {
    let record = KnowledgeRecord::new(question, answer);
    if !record.is_complete() {
        bail!("질문과 답변을 모두 입력해야 합니다");
    }

    let id = open_store()?.add_record(&record).context("행 추가 실패")?;
    println!("[OK] 행이 추가되었습니다 (ID: {})", id);

    Ok(())
}

/// 목록 (list)
fn cmd_list(limit: usize) -> Result<()> {
    let records = open_store()?
        .list_records(limit)
        .context("목록 조회 실패")?;

    if records.is_empty() {
        println!("[!] 저장된 행이 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 행 ({} 건):\n", records.len());
    for record in records {
        println!("  #{:<4} Q: {}", record.id, truncate_text(&record.question, 60));
        println!("        A: {}", truncate_text(&record.answer, 60));
        println!("        {}", record.created_at.format("%Y-%m-%d %H:%M"));
        println!();
    }

    Ok(())
}

/// 삭제 (delete)
fn cmd_delete(id: i64) -> Result<()> {
    if open_store()?.delete_record(id).context("행 삭제 실패")? {
        println!("[OK] 행 #{} 삭제됨", id);
        println!("    (벡터 인덱스는 다음 reingest 때 반영됩니다)");
    } else {
        println!("[!] ID {}인 행을 찾을 수 없습니다", id);
    }
    Ok(())
}

/// 인덱스 재구축 (reingest)
async fn cmd_reingest(config: RetrievalConfig) -> Result<()> {
    require_api_key()?;

    let target = config.embed_target;
    let retriever = open_retriever(open_store()?, config).await?;

    println!("[*] 벡터 인덱스 재구축 중... (임베딩 대상: {:?})", target);
    let report = retriever.reingest().await.context("리인제스트 실패")?;

    if report.indexed == 0 {
        println!("[!] 인덱싱된 행이 없습니다. 키워드 검색만 사용됩니다.");
    } else {
        println!("[OK] {} 행 인덱싱 완료", report.indexed);
    }
    println!(
        "    전체 {}, 대상 {}, 임베딩 실패 {}",
        report.total_rows, report.eligible_rows, report.skipped
    );
    if target == EmbedTarget::Enriched {
        println!("    컨텍스트 보강 {}/{}", report.enriched, report.eligible_rows);
    }

    Ok(())
}

/// 검색 (query)
async fn cmd_query(query: &str, limit: usize, json: bool, config: RetrievalConfig) -> Result<()> {
    let store = open_store()?;

    let hits = if has_api_key() {
        let retriever = open_retriever(store, config).await?;
        retriever.init().await;
        retriever.search(query, limit).await
    } else {
        tracing::warn!("No API key, falling back to keyword search");
        keyword_only_search(&store.load_rows()?, query, limit)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("[OK] 검색 결과 ({} 건):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!("{}. {} {}", i + 1, score_label(hit), truncate_text(&hit.question, 80));
        println!("   {}", truncate_text(&hit.answer, 200));
        println!();
    }

    Ok(())
}

/// 상태 (status)
async fn cmd_status(config: RetrievalConfig) -> Result<()> {
    println!("helpdesk-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());
    println!(
        "[*] 설정: top_k={}, 거리 임계값={}, 보강 동시성={}, 임베딩 대상={:?}",
        config.default_top_k,
        config.distance_threshold,
        config.enrichment_concurrency,
        config.embed_target
    );

    let api_key = has_api_key();
    if api_key {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정 (키워드 검색만 가능)");
    }

    let store = match open_store() {
        Ok(store) => store,
        Err(e) => {
            println!("[!] {:#}", e);
            return Ok(());
        }
    };

    match store.stats() {
        Ok(stats) => {
            println!("[OK] Q&A 행: {} 건", stats.record_count);
            if stats.incomplete_count > 0 {
                println!("[!] 불완전한 행: {} 건", stats.incomplete_count);
            }
        }
        Err(e) => println!("[!] 통계 조회 실패: {:#}", e),
    }

    if api_key {
        match open_retriever(store, config).await {
            Ok(retriever) => {
                retriever.init().await;
                match retriever.stats().await {
                    Ok(stats) => match stats.indexed_count {
                        Some(count) => println!("[OK] 벡터 인덱스: {} 행", count),
                        None => println!("[!] 벡터 인덱스 없음 (helpdesk-rag reingest)"),
                    },
                    Err(e) => tracing::debug!("벡터 통계 조회 실패: {:#}", e),
                }
            }
            Err(e) => tracing::debug!("HybridRetriever 초기화 실패: {:#}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 결과 점수 표시
fn score_label(hit: &SearchHit) -> String {
    if let Some(rrf) = hit.rrf_score {
        format!("[HYB {:.4}]", rrf)
    } else if let Some(score) = hit.text_score {
        format!("[TXT {}]", score)
    } else if let Some(distance) = hit.distance {
        format!("[VEC {:.3}]", distance)
    } else {
        "[-]".to_string()
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
