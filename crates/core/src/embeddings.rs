use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const DEFAULT_TEI_MODEL: &str = "BAAI/bge-m3";
pub const DEFAULT_TEI_DIMENSIONS: usize = 1024;

const TEI_BATCH_SIZE: usize = 32;

/// Turns text into fixed-dimension vectors. Identical input and
/// configuration must always produce identical output.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies model and configuration; recorded in the index manifest.
    fn model_id(&self) -> String;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| SearchError::BackendResponse {
            backend: self.model_id(),
            details: "no embedding returned".to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_id(&self) -> String {
        format!("char-trigram-{}", self.dimensions.max(1))
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// Client for a Text Embeddings Inference server hosting a sentence model.
pub struct TeiEmbedder {
    endpoint: String,
    model: String,
    dimensions: usize,
    client: Client,
}

impl TeiEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            dimensions,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for TeiEmbedder {
    fn model_id(&self) -> String {
        format!("tei:{}", self.model)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(TEI_BATCH_SIZE) {
            let response = self
                .client
                .post(format!("{}/embed", self.endpoint))
                .json(&json!({ "inputs": batch, "normalize": true }))
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(SearchError::BackendResponse {
                    backend: "tei".to_string(),
                    details: response.status().to_string(),
                });
            }

            let parsed: Vec<Vec<f32>> = response.json().await?;
            if parsed.len() != batch.len() {
                return Err(SearchError::BackendResponse {
                    backend: "tei".to_string(),
                    details: format!("{} embeddings for {} inputs", parsed.len(), batch.len()),
                });
            }
            if let Some(bad) = parsed.iter().find(|vector| vector.len() != self.dimensions) {
                return Err(SearchError::BackendResponse {
                    backend: "tei".to_string(),
                    details: format!(
                        "embedding dimension {} != configured {}",
                        bad.len(),
                        self.dimensions
                    ),
                });
            }
            vectors.extend(parsed);
        }

        Ok(vectors)
    }
}

pub fn normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}
