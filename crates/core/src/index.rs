//! Persisted nearest-neighbour index over chunk embeddings.
//!
//! The artifact is a directory of three files that is always written and
//! loaded as a whole:
//!
//! | File | Content |
//! |------|---------|
//! | `docstore.json` | the chunks, in row order |
//! | `vectors.f32` | little-endian `f32` rows, one per chunk |
//! | `manifest.json` | embedder, dimensions, counts, chunking parameters and the vector checksum |
//!
//! The manifest is written last. A reader that finds a manifest whose
//! checksum does not match the vector file refuses to load.

use crate::embeddings::normalize;
use crate::error::IndexError;
use crate::models::{IngestionOptions, ScoredChunk, TripleChunk};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

pub const INDEX_FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const DOCSTORE_FILE: &str = "docstore.json";
pub const VECTORS_FILE: &str = "vectors.f32";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedder: String,
    pub dimensions: usize,
    pub chunk_count: usize,
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
    pub vectors_sha256: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FlatIndex {
    manifest: IndexManifest,
    chunks: Vec<TripleChunk>,
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn build(
        chunks: Vec<TripleChunk>,
        embeddings: Vec<Vec<f32>>,
        embedder: impl Into<String>,
        options: IngestionOptions,
    ) -> Result<Self, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::Empty);
        }
        if chunks.len() != embeddings.len() {
            return Err(IndexError::Corrupt(format!(
                "embedding count {} doesn't match chunk count {}",
                embeddings.len(),
                chunks.len()
            )));
        }

        let dimensions = embeddings[0].len();
        if dimensions == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }

        let mut vectors = Vec::with_capacity(dimensions * embeddings.len());
        for mut embedding in embeddings {
            if embedding.len() != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: dimensions,
                    actual: embedding.len(),
                });
            }
            normalize(&mut embedding);
            vectors.extend(embedding);
        }

        let manifest = IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            embedder: embedder.into(),
            dimensions,
            chunk_count: chunks.len(),
            chunk_max_chars: options.chunk_max_chars,
            chunk_overlap_chars: options.chunk_overlap_chars,
            vectors_sha256: checksum(&vector_bytes(&vectors)),
            built_at: Utc::now(),
        };

        Ok(Self {
            manifest,
            chunks,
            vectors,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn chunks(&self) -> &[TripleChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.manifest.dimensions
    }

    pub fn save(&self, dir: &Path) -> Result<(), IndexError> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(DOCSTORE_FILE), serde_json::to_vec(&self.chunks)?)?;
        fs::write(dir.join(VECTORS_FILE), vector_bytes(&self.vectors))?;
        fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&self.manifest)?,
        )?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let manifest: IndexManifest = serde_json::from_slice(&read_required(dir, MANIFEST_FILE)?)?;
        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(manifest.format_version));
        }

        if manifest.dimensions == 0 {
            return Err(IndexError::Corrupt(format!(
                "{MANIFEST_FILE} declares zero dimensions"
            )));
        }
        let expected_len = manifest
            .chunk_count
            .checked_mul(manifest.dimensions)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| {
                IndexError::Corrupt(format!(
                    "{MANIFEST_FILE} declares {} chunks of {} dimensions",
                    manifest.chunk_count, manifest.dimensions
                ))
            })?;

        let bytes = read_required(dir, VECTORS_FILE)?;
        if bytes.len() != expected_len {
            return Err(IndexError::Corrupt(format!(
                "{VECTORS_FILE} holds {} bytes, expected {expected_len}",
                bytes.len()
            )));
        }
        if checksum(&bytes) != manifest.vectors_sha256 {
            return Err(IndexError::Corrupt(format!(
                "{VECTORS_FILE} checksum does not match manifest"
            )));
        }

        let chunks: Vec<TripleChunk> = serde_json::from_slice(&read_required(dir, DOCSTORE_FILE)?)?;
        if chunks.len() != manifest.chunk_count {
            return Err(IndexError::Corrupt(format!(
                "{DOCSTORE_FILE} holds {} chunks, manifest says {}",
                chunks.len(),
                manifest.chunk_count
            )));
        }

        let vectors = bytes
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect();

        Ok(Self {
            manifest,
            chunks,
            vectors,
        })
    }

    /// Top `k` chunks by cosine similarity, best first. Equal scores keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if query.len() != self.manifest.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.manifest.dimensions,
                actual: query.len(),
            });
        }
        if k == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.manifest.dimensions)
            .enumerate()
            .map(|(row, vector)| {
                let score = vector.iter().zip(&query).map(|(a, b)| a * b).sum::<f32>();
                (row, score)
            })
            .collect();

        scored.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(row, score)| ScoredChunk {
                chunk: self.chunks[row].clone(),
                score,
            })
            .collect())
    }
}

fn read_required(dir: &Path, name: &str) -> Result<Vec<u8>, IndexError> {
    let path = dir.join(name);
    if !path.is_file() {
        return Err(IndexError::MissingFile(path.display().to_string()));
    }
    Ok(fs::read(path)?)
}

fn vector_bytes(vectors: &[f32]) -> Vec<u8> {
    vectors.iter().flat_map(|value| value.to_le_bytes()).collect()
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
