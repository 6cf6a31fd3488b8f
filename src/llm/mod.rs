//! LLM 완성 모듈 - 청크 컨텍스트 문장 생성용
//!
//! 청크마다 짧은 요약 문장 한 줄을 받는 용도로만 사용하므로
//! 스트리밍 없이 단일 `generateContent` 호출만 지원합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::{get_api_key, GeminiError};

// ============================================================================
// Types
// ============================================================================

/// 사용자 메시지
///
/// 한 번의 요청-응답만 하므로 대화 이력 역할은 두지 않습니다.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// 완성 결과
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    /// 프로바이더가 보고한 종료 사유 (STOP, MAX_TOKENS 등)
    pub finish_reason: String,
}

// ============================================================================
// CompletionProvider Trait
// ============================================================================

/// LLM 완성 프로바이더 트레이트
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 메시지 목록과 시스템 프롬프트로 한 번의 완성 요청
    async fn complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        max_output_tokens: u32,
    ) -> Result<Completion>;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Completion
// ============================================================================

/// 기본 생성 모델
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini `generateContent` 구현체
#[derive(Debug)]
pub struct GeminiCompletion {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiCompletion {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: String, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model: model.to_string(),
            client,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> Result<Self> {
        Self::new(get_api_key()?)
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_BASE_URL, self.model)
    }
}

#[async_trait]
impl CompletionProvider for GeminiCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        system_prompt: &str,
        max_output_tokens: u32,
    ) -> Result<Completion> {
        let request = GenerateRequest::new(messages, system_prompt, max_output_tokens);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send completion request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read completion response body")?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<GeminiError>(&body) {
                anyhow::bail!(
                    "Gemini API error ({}): {}",
                    error.error.status,
                    error.error.message
                );
            }
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&body).context("Failed to parse completion response")?;

        Ok(parsed.into_completion())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction")]
    system_instruction: Content,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

impl GenerateRequest {
    fn new(messages: &[ChatMessage], system_prompt: &str, max_output_tokens: u32) -> Self {
        let contents = messages
            .iter()
            .map(|m| Content {
                role: Some("user"),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect();

        Self {
            contents,
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: system_prompt.to_string(),
                }],
            },
            generation_config: GenerationConfig {
                temperature: 0.2,
                max_output_tokens,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

impl GenerateResponse {
    fn into_completion(self) -> Completion {
        let Some(candidate) = self.candidates.into_iter().next() else {
            return Completion {
                text: String::new(),
                finish_reason: "UNKNOWN".to_string(),
            };
        };

        let text = candidate
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default();

        Completion {
            text,
            finish_reason: candidate
                .finish_reason
                .unwrap_or_else(|| "UNKNOWN".to_string()),
        }
    }
}

// ============================================================================
// Mock
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
