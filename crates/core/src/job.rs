use crate::config::StorageSettings;
use crate::embeddings::Embedder;
use crate::extractor::IfcTripleExtractor;
use crate::index::{FlatIndex, IndexManifest, MANIFEST_FILE};
use crate::ingest::{ingest_files_best_effort, SkippedFile};
use crate::storage::{download_with_extension, upload_dir, ObjectStore};
use crate::{IngestError, IngestionOptions};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct IndexJobReport {
    pub source_files: usize,
    pub processed_files: usize,
    pub skipped_files: Vec<SkippedFile>,
    pub chunk_count: usize,
    pub uploaded_keys: Vec<String>,
    pub manifest: IndexManifest,
}

/// Offline batch: source models in, index artifact out. Nothing is written
/// to the index prefix unless at least one chunk was produced.
pub async fn run_index_job(
    store: &dyn ObjectStore,
    settings: &StorageSettings,
    embedder: &dyn Embedder,
    options: IngestionOptions,
    work_dir: &Path,
) -> Result<IndexJobReport, IngestError> {
    let sources_dir = work_dir.join("sources");
    let index_dir = work_dir.join("index");

    let mut files =
        download_with_extension(store, &settings.source_prefix, "ifc", &sources_dir).await?;
    if files.is_empty() {
        return Err(IngestError::NoSourceFiles(format!(
            "{}/{}",
            store.describe(),
            settings.source_prefix
        )));
    }
    files.sort();
    info!(files = files.len(), "downloaded source models");

    let report = ingest_files_best_effort(&files, &IfcTripleExtractor, options)?;
    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "model skipped");
    }
    if report.chunks.is_empty() {
        return Err(IngestError::NoChunks {
            files: files.len(),
            skipped: report.skipped_files.len(),
        });
    }

    let chunk_count = report.chunks.len();
    info!(
        outcome = ?report.outcome(),
        processed = report.processed_files,
        skipped = report.skipped_files.len(),
        chunks = chunk_count,
        "ingested source models"
    );
    let texts: Vec<String> = report
        .chunks
        .iter()
        .map(|chunk| chunk.content.clone())
        .collect();
    let embeddings = embedder.embed_batch(&texts).await?;
    info!(chunks = chunk_count, embedder = %embedder.model_id(), "embedded chunks");

    let index = FlatIndex::build(report.chunks, embeddings, embedder.model_id(), options)?;
    index.save(&index_dir)?;

    let uploaded_keys = upload_dir(
        store,
        &index_dir,
        &settings.index_prefix,
        Some(MANIFEST_FILE),
    )
    .await?;
    info!(
        keys = uploaded_keys.len(),
        target = %store.describe(),
        prefix = %settings.index_prefix,
        "uploaded index"
    );

    Ok(IndexJobReport {
        source_files: files.len(),
        processed_files: report.processed_files,
        skipped_files: report.skipped_files,
        chunk_count,
        uploaded_keys,
        manifest: index.manifest().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::fixtures::SAMPLE_IFC;
    use crate::storage::LocalStore;
    use std::fs;
    use tempfile::tempdir;

    fn settings() -> StorageSettings {
        StorageSettings {
            source_prefix: "ifc-data/".to_string(),
            index_prefix: "vector_store/faiss_index".to_string(),
            ..StorageSettings::default()
        }
    }

    #[tokio::test]
    async fn job_uploads_a_loadable_index() -> Result<(), Box<dyn std::error::Error>> {
        let bucket = tempdir()?;
        fs::create_dir_all(bucket.path().join("ifc-data"))?;
        fs::write(bucket.path().join("ifc-data/house.ifc"), SAMPLE_IFC)?;
        fs::write(bucket.path().join("ifc-data/broken.ifc"), b"garbage")?;
        let store = LocalStore::new(bucket.path());
        let work = tempdir()?;

        let report = run_index_job(
            &store,
            &settings(),
            &CharacterNgramEmbedder::default(),
            IngestionOptions::default(),
            work.path(),
        )
        .await?;

        assert_eq!(report.source_files, 2);
        assert_eq!(report.processed_files, 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.uploaded_keys.last().map(String::as_str),
            Some("vector_store/faiss_index/manifest.json")
        );

        let index = FlatIndex::load(&bucket.path().join("vector_store/faiss_index"))?;
        assert_eq!(index.len(), report.chunk_count);
        assert_eq!(index.manifest().embedder, "char-trigram-128");
        Ok(())
    }

    #[tokio::test]
    async fn empty_source_prefix_writes_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let bucket = tempdir()?;
        let store = LocalStore::new(bucket.path());
        let work = tempdir()?;

        let result = run_index_job(
            &store,
            &settings(),
            &CharacterNgramEmbedder::default(),
            IngestionOptions::default(),
            work.path(),
        )
        .await;

        assert!(matches!(result, Err(IngestError::NoSourceFiles(_))));
        assert!(!bucket.path().join("vector_store").exists());
        Ok(())
    }

    #[tokio::test]
    async fn only_unreadable_models_is_no_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let bucket = tempdir()?;
        fs::create_dir_all(bucket.path().join("ifc-data"))?;
        fs::write(bucket.path().join("ifc-data/broken.ifc"), b"garbage")?;
        let store = LocalStore::new(bucket.path());
        let work = tempdir()?;

        let result = run_index_job(
            &store,
            &settings(),
            &CharacterNgramEmbedder::default(),
            IngestionOptions::default(),
            work.path(),
        )
        .await;

        assert!(matches!(
            result,
            Err(IngestError::NoChunks {
                files: 1,
                skipped: 1
            })
        ));
        assert!(!bucket.path().join("vector_store").exists());
        Ok(())
    }
}
