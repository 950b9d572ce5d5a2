pub mod aws;
pub mod chat;
pub mod chunking;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod job;
pub mod llm;
pub mod models;
pub mod secrets;
pub mod setup;
pub mod step;
pub mod storage;

#[cfg(test)]
mod fixtures;

pub use aws::AwsCredentials;
pub use chat::{
    ChatReply, ChatRequest, ChatService, IndexRetriever, Retriever, ServiceState, SourceRef,
};
pub use chunking::{build_file_chunks, render_document, render_triple, split_text, ChunkingConfig};
pub use config::{ServiceSettings, StorageSettings};
pub use conversation::{ChatTurn, Conversation, SessionStore};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, TeiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_TEI_DIMENSIONS, DEFAULT_TEI_MODEL,
};
pub use error::{ChatError, IndexError, IngestError, SearchError, SetupError, StorageError};
pub use extractor::{extract_kg_triples, IfcTripleExtractor, TripleExtractor};
pub use index::{FlatIndex, IndexManifest};
pub use ingest::{
    discover_ifc_files, ingest_files_best_effort, ingest_folder_chunks_best_effort,
    IngestOutcome, IngestionReport, SkippedFile,
};
pub use job::{run_index_job, IndexJobReport};
pub use llm::{AnswerModel, AnswerRequest, GeminiClient, LlmSettings};
pub use models::{ChunkMetadata, IngestionOptions, ScoredChunk, Triple, TripleChunk};
pub use secrets::{SecretSource, SecretsManager, StaticSecret};
pub use setup::initialize;
pub use storage::{LocalStore, ObjectInfo, ObjectStore, S3Store};
