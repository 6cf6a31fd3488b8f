//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 리인제스트 시 질문(또는 컨텍스트가 붙은 청크)을, 검색 시 사용자 질의를
//! 같은 프로바이더로 벡터화합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env()?;
//! let vector = embedder.embed("Yazıcı nasıl kurulur?").await?;
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 실패(거부, 타임아웃, 빈 입력)는 모두 `Err`로 반환하며,
/// 레코드 단위로 건너뛸지는 호출자가 결정합니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

/// Gemini 임베딩 API 엔드포인트 (gemini-embedding-001 - MRL 지원)
/// source: https://ai.google.dev/gemini-api/docs/embeddings
const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// 지원 차원 (MRL)
const SUPPORTED_DIMENSIONS: [usize; 3] = [768, 1536, 3072];

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: usize = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const MIN_DELAY: Duration = Duration::from_millis(1000);
/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Google Gemini 임베딩 구현체
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

/// 슬라이딩 윈도우 + 최소 간격 rate limiter
#[derive(Debug)]
struct RateLimiter {
    sent: Vec<Instant>,
    max_requests: usize,
    window: Duration,
    min_delay: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration, min_delay: Duration) -> Self {
        Self {
            sent: Vec::new(),
            max_requests,
            window,
            min_delay,
        }
    }

    /// 다음 요청을 보낼 수 있을 때까지 대기
    async fn acquire(&mut self) {
        if let Some(last) = self.sent.last() {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }

        let now = Instant::now();
        self.sent.retain(|&t| now.duration_since(t) < self.window);

        if self.sent.len() >= self.max_requests {
            if let Some(&oldest) = self.sent.first() {
                let wait = self.window.saturating_sub(now.duration_since(oldest));
                if !wait.is_zero() {
                    tracing::debug!("Embedding rate limit reached, waiting {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
                let now = Instant::now();
                self.sent.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        self.sent.push(Instant::now());
    }
}

impl GeminiEmbedding {
    /// 기본 차원(768)으로 생성
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성 (768, 1536, 3072)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if !SUPPORTED_DIMENSIONS.contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be one of {:?}",
                dimension,
                SUPPORTED_DIMENSIONS
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            dimension,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
                MIN_DELAY,
            ))),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> Result<Self> {
        Self::new(get_api_key()?)
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'static str,
    content: EmbedContent<'a>,
    #[serde(rename = "outputDimensionality")]
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct EmbedContent<'a> {
    parts: Vec<EmbedPart<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Gemini API 에러 응답 (임베딩/생성 공통)
#[derive(Debug, Deserialize)]
pub(crate) struct GeminiError {
    pub(crate) error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiErrorDetail {
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            anyhow::bail!("Refusing to embed empty text");
        }

        let request = EmbedRequest {
            model: "models/gemini-embedding-001",
            content: EmbedContent {
                parts: vec![EmbedPart { text }],
            },
            output_dimensionality: self.dimension,
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            self.rate_limiter.lock().await.acquire().await;

            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Embedding request failed, retrying (attempt {}/{})",
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(Self::backoff(attempt)).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read embedding response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                if parsed.embedding.values.len() != self.dimension {
                    anyhow::bail!(
                        "Embedding dimension mismatch: expected {}, got {}",
                        self.dimension,
                        parsed.embedding.values.len()
                    );
                }
                return Ok(parsed.embedding.values);
            }

            if status.as_u16() == 429 {
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
                if attempt < MAX_RETRIES {
                    let backoff = Self::backoff(attempt);
                    tracing::warn!(
                        "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                    anyhow::bail!(
                        "Gemini API error ({}): {}",
                        error.error.status,
                        error.error.message
                    );
                }
                anyhow::bail!("Gemini API error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드
///
/// 우선순위:
/// 1. `GEMINI_API_KEY`
/// 2. `GOOGLE_AI_API_KEY`
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"]
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.is_empty()).unwrap_or(false))
}

// ============================================================================
// Mock
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
