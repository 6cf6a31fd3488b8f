//! 키워드 검색 - 원본 행에 대한 부분 문자열/단어 겹침 점수
//!
//! 인덱싱 단계가 필요 없으므로 벡터 인덱스가 오래되었거나 없어도
//! 항상 현재 행을 기준으로 동작합니다.

use super::record::{KnowledgeRecord, SearchHit};

/// 질의 전체가 질문/답변에 그대로 포함될 때 가산점
const PHRASE_BONUS: u32 = 10;
/// 단어가 질문에 포함될 때
const QUESTION_WORD_SCORE: u32 = 2;
/// 단어가 답변에 포함될 때
const ANSWER_WORD_SCORE: u32 = 1;
/// 이 길이(문자 수) 이하의 토큰은 무시
const MIN_WORD_CHARS: usize = 2;

/// 질의를 소문자 단어 집합으로 분해
///
/// 공백 기준 분리 후 3글자 이상만 남기며, 중복은 한 번만 셉니다.
fn query_words(query_lower: &str) -> Vec<&str> {
    let mut words: Vec<&str> = Vec::new();
    for word in query_lower.split_whitespace() {
        if word.chars().count() > MIN_WORD_CHARS && !words.contains(&word) {
            words.push(word);
        }
    }
    words
}

/// 단일 레코드 점수
fn score_record(record: &KnowledgeRecord, query_lower: &str, words: &[&str]) -> u32 {
    let question = record.question.to_lowercase();
    let answer = record.answer.to_lowercase();

    let mut score = 0;

    if question.contains(query_lower) || answer.contains(query_lower) {
        score += PHRASE_BONUS;
    }

    for word in words {
        if question.contains(word) {
            score += QUESTION_WORD_SCORE;
        }
        if answer.contains(word) {
            score += ANSWER_WORD_SCORE;
        }
    }

    score
}

/// 키워드 검색
///
/// 점수 내림차순, 동점은 입력 순서 유지. 점수 0인 행은 제외합니다.
pub fn lexical_search(rows: &[KnowledgeRecord], query: &str, top_k: usize) -> Vec<SearchHit> {
    let query_lower = query.to_lowercase();
    let words = query_words(&query_lower);
    if words.is_empty() {
        return vec![];
    }

    let mut scored: Vec<(&KnowledgeRecord, u32)> = rows
        .iter()
        .filter(|r| r.is_complete())
        .map(|r| (r, score_record(r, &query_lower, &words)))
        .filter(|(_, score)| *score > 0)
        .collect();

    // sort_by는 안정 정렬
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    scored
        .into_iter()
        .take(top_k)
        .map(|(record, score)| SearchHit {
            text_score: Some(score as f32),
            ..SearchHit::new(record.question.clone(), record.answer.clone())
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
