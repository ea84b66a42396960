use crate::error::{Error, RecognitionKind, Result};
use crate::models::question::AnalyzedQuestion;
use crate::models::subject::Subject;
use crate::services::normalizer;
use crate::utils::image::{prepare_for_recognition, PreparedImage};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value as JsonValue;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Seam over the external vision+text inference service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Sends a chat-completions payload and returns the raw text content of
    /// the first choice.
    async fn complete(&self, payload: JsonValue) -> Result<String>;
}

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    api_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, api_url: String, client: Client) -> Self {
        Self {
            client,
            api_key,
            api_url,
        }
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn complete(&self, payload: JsonValue) -> Result<String> {
        let res = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() || e.is_connect() {
                    RecognitionKind::Network
                } else {
                    RecognitionKind::Unknown
                };
                Error::recognition(kind, format!("Inference request failed: {}", e))
            })?;

        let status = res.status();
        if !status.is_success() {
            let kind = match status.as_u16() {
                429 => RecognitionKind::Quota,
                401 | 403 => RecognitionKind::Permission,
                400 | 413 | 422 => RecognitionKind::BadInput,
                _ => RecognitionKind::Unknown,
            };
            let text = res.text().await.unwrap_or_default();
            return Err(Error::recognition(
                kind,
                format!("Inference service error {}: {}", status, text),
            ));
        }

        let body: JsonValue = res.json().await.map_err(|e| {
            Error::recognition(
                RecognitionKind::Unknown,
                format!("Inference response was not JSON: {}", e),
            )
        })?;

        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                Error::recognition(
                    RecognitionKind::Unknown,
                    "Invalid inference response format".to_string(),
                )
            })
    }
}

#[derive(Debug, Clone)]
pub struct PromptStrategy {
    pub name: &'static str,
    pub json_mode: bool,
    instruction: String,
}

const SYSTEM_PROMPT: &str = "You read photographed or scanned certification exam pages and \
transcribe the multiple-choice questions on them. You only report what is actually on the \
page; you never invent questions.";

/// Ordered fallback chain, most demanding first. The engine walks it
/// left-to-right and stops at the first strategy that yields usable
/// questions.
pub fn strategies(subject: Subject) -> Vec<PromptStrategy> {
    let schema_hint = r#"Respond with a JSON object of this exact shape:
{"questions": [{"question": "...", "options": ["...", "..."], "correctAnswer": "A",
"explanation": "...", "difficulty": "easy|medium|hard", "topic": "...",
"needsManualReview": false, "notes": "..."}]}"#;

    vec![
        PromptStrategy {
            name: "structured",
            json_mode: true,
            instruction: format!(
                "Extract every multiple-choice question from this scanned exam page. \
The page belongs to the subject '{subject}'.\n{schema_hint}\n\
Rules:\n\
1. Keep option order as printed; use the printed option letters as ids where visible.\n\
2. If an answer marker (circled letter, checkmark, answer key) is visible, set correctAnswer \
to that option. If there is no recognizable marker, set correctAnswer to null and \
needsManualReview to true. Never guess.\n\
3. If a 'select the best answer' instruction appears without its own question text, \
reconstruct the question from the immediately preceding context; if that is impossible, \
set needsManualReview to true and note why in notes.\n\
4. Do not include anything that is not a multiple-choice question."
            ),
        },
        PromptStrategy {
            name: "simplified",
            json_mode: true,
            instruction: format!(
                "List the multiple-choice questions on this exam page ('{subject}') as JSON: \
{{\"questions\": [{{\"question\", \"options\", \"correctAnswer\"}}]}}. \
Use null for correctAnswer when the page does not mark it."
            ),
        },
        PromptStrategy {
            name: "recognition",
            json_mode: false,
            instruction: "First transcribe all printed text you can read on this page, then \
convert any multiple-choice questions in the transcription into a JSON object \
{\"questions\": [...]} with question, options and correctAnswer fields."
                .to_string(),
        },
        PromptStrategy {
            name: "freeform",
            json_mode: false,
            instruction: "Are there any quiz or exam questions visible in this image? If so, \
return them as JSON with a top-level \"questions\" array; each entry needs at least a \
question text and its answer options."
                .to_string(),
        },
    ]
}

fn build_payload(strategy: &PromptStrategy, image: &PreparedImage) -> JsonValue {
    let mut payload = serde_json::json!({
        "model": "gpt-4o",
        "messages": [
            {"role": "system", "content": SYSTEM_PROMPT},
            {"role": "user", "content": [
                {"type": "text", "text": strategy.instruction},
                {"type": "image_url", "image_url": {
                    "url": format!("data:{};base64,{}", image.mime, image.base64),
                    "detail": "high"
                }}
            ]}
        ],
        "temperature": 0.2,
        "max_tokens": 4000
    });
    if strategy.json_mode {
        payload["response_format"] = serde_json::json!({ "type": "json_object" });
    }
    payload
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?").expect("fence regex"))
}

fn json_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[\s\S]*\}").expect("json block regex"))
}

fn strip_code_fences(raw: &str) -> String {
    fence_regex().replace_all(raw, "").trim().to_string()
}

/// Two-step parse: strip fences and try the whole thing, then fall back to
/// the first balanced-looking brace block.
fn parse_recognition_payload(raw: &str) -> Option<JsonValue> {
    let cleaned = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str::<JsonValue>(&cleaned) {
        return Some(value);
    }
    let block = json_block_regex().find(&cleaned)?;
    serde_json::from_str(block.as_str()).ok()
}

#[derive(Debug)]
pub struct ExtractionOutcome {
    pub questions: Vec<AnalyzedQuestion>,
    pub discarded: usize,
    /// Name of the strategy that produced the result.
    pub strategy: &'static str,
}

/// Walks the prompt-strategy chain against the inference service until one
/// response yields at least one valid question.
#[derive(Clone)]
pub struct ExtractionService {
    client: Arc<dyn InferenceClient>,
    max_upload_bytes: usize,
    strategy_backoff: Duration,
}

impl ExtractionService {
    pub fn new(client: Arc<dyn InferenceClient>, max_upload_mb: usize) -> Self {
        Self {
            client,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            strategy_backoff: Duration::from_millis(1500),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.strategy_backoff = backoff;
        self
    }

    pub async fn extract_questions(
        &self,
        bytes: &[u8],
        mime: &str,
        subject: Subject,
    ) -> Result<ExtractionOutcome> {
        let prepared = prepare_for_recognition(bytes, mime, self.max_upload_bytes)?;

        let mut last_error: Option<Error> = None;
        let mut empty_outcome: Option<ExtractionOutcome> = None;

        for (i, strategy) in strategies(subject).iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.strategy_backoff).await;
            }

            let raw = match self.client.complete(build_payload(strategy, &prepared)).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!("Strategy '{}' failed: {}", strategy.name, e);
                    last_error = Some(e);
                    continue;
                }
            };

            let Some(value) = parse_recognition_payload(&raw) else {
                tracing::warn!(
                    "Strategy '{}' returned unparseable output ({} chars)",
                    strategy.name,
                    raw.len()
                );
                last_error = Some(Error::recognition(
                    RecognitionKind::Unknown,
                    "Recognition output contained no parseable JSON".to_string(),
                ));
                continue;
            };

            let batch = normalizer::normalize_batch(&value);
            if !batch.questions.is_empty() {
                tracing::info!(
                    "Strategy '{}' extracted {} questions ({} discarded)",
                    strategy.name,
                    batch.questions.len(),
                    batch.discarded
                );
                return Ok(ExtractionOutcome {
                    questions: batch.questions,
                    discarded: batch.discarded,
                    strategy: strategy.name,
                });
            }

            // Parsed cleanly but nothing usable. Remember it: an empty page
            // is a success with zero questions, not a failure. The discard
            // count keeps the worst case seen so "only garbage found" is
            // not masked by a later strategy that saw nothing at all.
            tracing::info!(
                "Strategy '{}' found no usable questions ({} discarded)",
                strategy.name,
                batch.discarded
            );
            if empty_outcome
                .as_ref()
                .map(|o| batch.discarded >= o.discarded)
                .unwrap_or(true)
            {
                empty_outcome = Some(ExtractionOutcome {
                    questions: Vec::new(),
                    discarded: batch.discarded,
                    strategy: strategy.name,
                });
            }
        }

        if let Some(outcome) = empty_outcome {
            return Ok(outcome);
        }

        Err(last_error.unwrap_or_else(|| {
            Error::recognition(
                RecognitionKind::Unknown,
                "All recognition strategies failed".to_string(),
            )
        }))
    }
}
