use crate::conversation::ChatTurn;
use crate::models::ScoredChunk;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 500;

const SYSTEM_INSTRUCTION: &str = "You answer questions about building information models. \
The context lists facts extracted from IFC files as `<subject> <PREDICATE> <object>.` lines. \
Answer only from that context and the conversation so far. \
If the context does not contain the answer, say that the building model does not provide it.";

pub struct AnswerRequest<'a> {
    pub question: &'a str,
    pub context: &'a [ScoredChunk],
    /// Oldest first.
    pub history: &'a [ChatTurn],
}

#[async_trait]
pub trait AnswerModel: Send + Sync {
    async fn answer(&self, request: &AnswerRequest<'_>) -> Result<String, SearchError>;
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            temperature: 0.0,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    client: Client,
    settings: LlmSettings,
    api_key: String,
}

impl GeminiClient {
    pub fn new(settings: LlmSettings, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            settings,
            api_key: api_key.into(),
        }
    }

    fn request_body(&self, request: &AnswerRequest<'_>) -> Value {
        let mut contents = Vec::with_capacity(request.history.len() * 2 + 1);
        for turn in request.history {
            contents.push(json!({ "role": "user", "parts": [{ "text": turn.question }] }));
            contents.push(json!({ "role": "model", "parts": [{ "text": turn.answer }] }));
        }
        contents.push(json!({
            "role": "user",
            "parts": [{ "text": build_prompt(request.question, request.context) }]
        }));

        json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "contents": contents,
            "generationConfig": {
                "temperature": self.settings.temperature,
                "maxOutputTokens": self.settings.max_output_tokens
            }
        })
    }
}

#[async_trait]
impl AnswerModel for GeminiClient {
    async fn answer(&self, request: &AnswerRequest<'_>) -> Result<String, SearchError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        );

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let details = response.text().await.unwrap_or_default();
            return Err(SearchError::BackendResponse {
                backend: "gemini".to_string(),
                details: format!("{status}: {}", details.chars().take(500).collect::<String>()),
            });
        }

        let body: Value = response.json().await?;
        extract_answer(&body)
    }
}

/// Numbered context blocks tagged with their source file, then the question.
pub fn build_prompt(question: &str, context: &[ScoredChunk]) -> String {
    let mut prompt = String::from("Context:\n");
    if context.is_empty() {
        prompt.push_str("(no matching building data)\n");
    }
    for (position, hit) in context.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] [{}]\n{}\n\n",
            position + 1,
            hit.chunk.metadata.file,
            hit.chunk.content
        ));
    }
    prompt.push_str("\nQuestion: ");
    prompt.push_str(question.trim());
    prompt
}

fn extract_answer(body: &Value) -> Result<String, SearchError> {
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::BackendResponse {
            backend: "gemini".to_string(),
            details: match body.pointer("/promptFeedback/blockReason").and_then(Value::as_str) {
                Some(reason) => format!("prompt blocked: {reason}"),
                None => "response has no candidate content".to_string(),
            },
        })?;

    let text = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();

    if text.trim().is_empty() {
        return Err(SearchError::BackendResponse {
            backend: "gemini".to_string(),
            details: "empty answer".to_string(),
        });
    }
    Ok(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, TripleChunk};

    fn hit(file: &str, content: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: TripleChunk {
                chunk_id: "id".to_string(),
                chunk_index: 0,
                content: content.to_string(),
                metadata: ChunkMetadata {
                    file: file.to_string(),
                },
            },
            score: 0.9,
        }
    }

    #[test]
    fn prompt_numbers_and_tags_context() {
        let context = vec![
            hit("house.ifc", "Wall-1 HASMATERIAL Concrete."),
            hit("barn.ifc", "Door-2 HASWIDTH 0.9."),
        ];
        let prompt = build_prompt("  What is Wall-1 made of? ", &context);

        assert!(prompt.contains("[1] [house.ifc]\nWall-1 HASMATERIAL Concrete."));
        assert!(prompt.contains("[2] [barn.ifc]\nDoor-2 HASWIDTH 0.9."));
        assert!(prompt.ends_with("Question: What is Wall-1 made of?"));
    }

    #[test]
    fn request_replays_history_before_the_question() {
        let client = GeminiClient::new(LlmSettings::default(), "key");
        let history = vec![ChatTurn::new("first?", "one")];
        let body = client.request_body(&AnswerRequest {
            question: "second?",
            context: &[],
            history: &history,
        });

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "one");
        assert!(contents[2]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .ends_with("second?"));
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 500);
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn answer_text_is_joined_from_parts() {
        let body = json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "Wall-1 is " }, { "text": "concrete." }] }
            }]
        });
        assert_eq!(extract_answer(&body).unwrap(), "Wall-1 is concrete.");
    }

    #[test]
    fn blocked_prompt_is_an_error() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let error = extract_answer(&body).unwrap_err();
        assert!(error.to_string().contains("SAFETY"));
    }
}
