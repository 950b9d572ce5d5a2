use crate::chunking::build_file_chunks;
use crate::extractor::{IfcTripleExtractor, TripleExtractor};
use crate::{IngestError, IngestionOptions, TripleChunk};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub fn discover_ifc_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_ifc = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ifc"));

        if is_ifc {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Complete,
    Partial,
    Empty,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub chunks: Vec<TripleChunk>,
    pub processed_files: usize,
    pub skipped_files: Vec<SkippedFile>,
}

impl IngestionReport {
    pub fn outcome(&self) -> IngestOutcome {
        if self.chunks.is_empty() {
            IngestOutcome::Empty
        } else if self.skipped_files.is_empty() {
            IngestOutcome::Complete
        } else {
            IngestOutcome::Partial
        }
    }
}

pub fn ingest_files_best_effort(
    files: &[PathBuf],
    extractor: &dyn TripleExtractor,
    options: IngestionOptions,
) -> Result<IngestionReport, IngestError> {
    let mut report = IngestionReport::default();
    let mut cursor = 0u64;

    for path in files {
        let build_result = (|| {
            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
            let triples = extractor.extract_triples(path)?;
            debug!(file = %file_name, triples = triples.len(), "extracted triples");

            build_file_chunks(file_name, &triples, &options, cursor)
        })();

        match build_result {
            Ok((file_chunks, _)) if file_chunks.is_empty() => {
                warn!(path = %path.display(), "no triples extracted");
                report.skipped_files.push(SkippedFile {
                    path: path.clone(),
                    reason: "no triples extracted".to_string(),
                });
            }
            Ok((file_chunks, next_cursor)) => {
                cursor = next_cursor;
                report.processed_files += 1;
                report.chunks.extend(file_chunks);
            }
            Err(error @ IngestError::InvalidChunkConfig(_)) => return Err(error),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping unreadable model");
                report.skipped_files.push(SkippedFile {
                    path: path.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}

pub fn ingest_folder_chunks_best_effort(
    folder: &Path,
    options: IngestionOptions,
) -> Result<IngestionReport, IngestError> {
    let files = discover_ifc_files(folder);

    if files.is_empty() {
        return Err(IngestError::NoSourceFiles(folder.display().to_string()));
    }

    ingest_files_best_effort(&files, &IfcTripleExtractor, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::SAMPLE_IFC;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn discover_ifc_files_is_recursive_and_sorted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("b.IFC")).and_then(|mut file| file.write_all(b"ISO-10303-21;"))?;
        File::create(nested.join("a.ifc")).and_then(|mut file| file.write_all(b"ISO-10303-21;"))?;
        fs::write(base.join("notes.txt"), b"ignored")?;

        let files = discover_ifc_files(base);
        assert_eq!(files.len(), 2);
        assert!(files[0] < files[1]);
        Ok(())
    }

    #[test]
    fn ingestion_fails_without_models() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = ingest_folder_chunks_best_effort(dir.path(), IngestionOptions::default());
        assert!(matches!(result, Err(IngestError::NoSourceFiles(_))));
        Ok(())
    }

    #[test]
    fn best_effort_skips_unreadable_models() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("broken.ifc"), b"not a step file")?;
        fs::write(dir.path().join("house.ifc"), SAMPLE_IFC)?;

        let report = ingest_folder_chunks_best_effort(dir.path(), IngestionOptions::default())?;

        assert_eq!(report.outcome(), IngestOutcome::Partial);
        assert_eq!(report.processed_files, 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("broken.ifc")
        );
        assert!(report
            .chunks
            .iter()
            .all(|chunk| chunk.metadata.file == "house.ifc"));
        Ok(())
    }

    #[test]
    fn model_without_triples_counts_as_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(
            dir.path().join("empty.ifc"),
            "ISO-10303-21;HEADER;ENDSEC;DATA;#1=IFCCARTESIANPOINT((0.,0.,0.));ENDSEC;END-ISO-10303-21;",
        )?;

        let report = ingest_folder_chunks_best_effort(dir.path(), IngestionOptions::default())?;
        assert_eq!(report.outcome(), IngestOutcome::Empty);
        assert_eq!(report.skipped_files[0].reason, "no triples extracted");
        Ok(())
    }

    #[test]
    fn hostile_and_bom_prefixed_models_do_not_stop_the_batch(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("a_nested.ifc");
        fs::write(
            &nested,
            format!(
                "ISO-10303-21;HEADER;ENDSEC;DATA;#1=IFCWALL({};ENDSEC;END-ISO-10303-21;",
                "(".repeat(200_000)
            ),
        )?;
        let bom = dir.path().join("b_bom.ifc");
        fs::write(&bom, format!("\u{feff}{SAMPLE_IFC}"))?;

        let report = ingest_files_best_effort(
            &[nested.clone(), bom],
            &IfcTripleExtractor,
            IngestionOptions::default(),
        )?;
        assert_eq!(report.processed_files, 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(report.skipped_files[0].path, nested);
        assert!(report
            .chunks
            .iter()
            .all(|chunk| chunk.metadata.file == "b_bom.ifc"));
        Ok(())
    }
}
