use crate::chat::{ChatService, IndexRetriever};
use crate::config::{ServiceSettings, StorageSettings};
use crate::conversation::SessionStore;
use crate::embeddings::Embedder;
use crate::error::SetupError;
use crate::index::FlatIndex;
use crate::llm::AnswerModel;
use crate::secrets::SecretSource;
use crate::storage::{download_prefix, ObjectStore};
use std::sync::Arc;
use tracing::info;

/// Builds the chat service once at startup: fetches the model API key,
/// pulls the index artifact into a scratch directory, loads it and checks
/// it was built with the embedder the service will query with.
pub async fn initialize<F>(
    storage: &StorageSettings,
    service: &ServiceSettings,
    store: &dyn ObjectStore,
    secrets: &dyn SecretSource,
    embedder: Arc<dyn Embedder>,
    make_model: F,
) -> Result<ChatService, SetupError>
where
    F: FnOnce(String) -> Arc<dyn AnswerModel>,
{
    let api_key = secrets
        .secret(&service.secret_name)
        .await
        .map_err(SetupError::Secret)?;
    let model = make_model(api_key);

    let scratch = tempfile::tempdir()?;
    let prefix = format!("{}/", storage.index_prefix.trim_end_matches('/'));
    let files = download_prefix(store, &prefix, scratch.path()).await?;
    if files.is_empty() {
        return Err(SetupError::EmptyIndex(format!(
            "{}/{}",
            store.describe(),
            prefix
        )));
    }
    info!(files = files.len(), source = %store.describe(), prefix = %prefix, "downloaded index");

    let index = FlatIndex::load(scratch.path())?;
    let manifest = index.manifest();
    let runtime = embedder.model_id();
    if manifest.embedder != runtime || manifest.dimensions != embedder.dimensions() {
        return Err(SetupError::EmbedderMismatch {
            indexed: format!("{} ({} dims)", manifest.embedder, manifest.dimensions),
            runtime: format!("{} ({} dims)", runtime, embedder.dimensions()),
        });
    }
    info!(
        chunks = manifest.chunk_count,
        embedder = %manifest.embedder,
        chunk_max_chars = manifest.chunk_max_chars,
        chunk_overlap_chars = manifest.chunk_overlap_chars,
        built_at = %manifest.built_at,
        "loaded index"
    );

    Ok(ChatService::new(
        Arc::new(IndexRetriever::new(index, embedder)),
        model,
        SessionStore::new(service.max_history_turns, service.max_sessions),
        service.top_k,
    ))
}
