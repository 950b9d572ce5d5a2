//! The online question-answering path: retrieval, answering and per-session
//! memory, plus the state the HTTP layer serves from.

use crate::conversation::{ChatTurn, SessionStore};
use crate::embeddings::Embedder;
use crate::error::{ChatError, SearchError};
use crate::index::FlatIndex;
use crate::llm::{AnswerModel, AnswerRequest};
use crate::models::ScoredChunk;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, SearchError>;
}

pub struct IndexRetriever {
    index: FlatIndex,
    embedder: Arc<dyn Embedder>,
}

impl IndexRetriever {
    pub fn new(index: FlatIndex, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, SearchError> {
        let vector = self.embedder.embed(query).await?;
        Ok(self.index.search(&vector, k)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub file: String,
    pub score: f32,
    pub chunk_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub answer: String,
    pub session_id: String,
    pub sources: Vec<SourceRef>,
}

pub struct ChatService {
    retriever: Arc<dyn Retriever>,
    model: Arc<dyn AnswerModel>,
    sessions: SessionStore,
    top_k: usize,
}

impl ChatService {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        model: Arc<dyn AnswerModel>,
        sessions: SessionStore,
        top_k: usize,
    ) -> Self {
        Self {
            retriever,
            model,
            sessions,
            top_k,
        }
    }

    pub async fn ask(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(ChatError::EmptyQuestion);
        }

        let session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let context = self
            .retriever
            .retrieve(question, self.top_k)
            .await
            .map_err(ChatError::Retrieval)?;
        let history = self.sessions.history(&session_id).await;
        debug!(
            session = %session_id,
            hits = context.len(),
            history = history.len(),
            "answering question"
        );

        let answer = self
            .model
            .answer(&AnswerRequest {
                question,
                context: &context,
                history: &history,
            })
            .await
            .map_err(ChatError::Answer)?;

        self.sessions
            .record(&session_id, ChatTurn::new(question, answer.clone()))
            .await;
        info!(session = %session_id, sources = context.len(), "answered question");

        Ok(ChatReply {
            answer,
            session_id,
            sources: context
                .into_iter()
                .map(|hit| SourceRef {
                    file: hit.chunk.metadata.file,
                    score: hit.score,
                    chunk_id: hit.chunk.chunk_id,
                })
                .collect(),
        })
    }
}

/// Outcome of service initialization. A degraded service answers every
/// request with the same failure and never retries setup.
#[derive(Clone)]
pub enum ServiceState {
    Ready(Arc<ChatService>),
    Degraded { reason: String },
}

impl ServiceState {
    pub fn from_setup<E: std::fmt::Display>(result: Result<ChatService, E>) -> Self {
        match result {
            Ok(service) => Self::Ready(Arc::new(service)),
            Err(error) => Self::Degraded {
                reason: error.to_string(),
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}
