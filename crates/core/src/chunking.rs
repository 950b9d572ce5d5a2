use crate::error::IngestError;
use crate::models::{ChunkMetadata, IngestionOptions, Triple, TripleChunk};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

/// Boundaries tried in order: paragraph, line, word, then a hard cut.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl From<IngestionOptions> for ChunkingConfig {
    fn from(value: IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be positive".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than window {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

pub fn render_triple(triple: &Triple) -> String {
    triple.to_string()
}

pub fn render_document(triples: &[Triple]) -> String {
    triples
        .iter()
        .map(render_triple)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splits `text` into windows of at most `max_chars` characters, with up to
/// `overlap_chars` carried over between consecutive windows.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut separator = separators.last().copied().unwrap_or("");
    let mut finer: &[&str] = &[];

    for (position, candidate) in separators.iter().enumerate() {
        if candidate.is_empty() {
            separator = candidate;
            break;
        }
        if text.contains(candidate) {
            separator = candidate;
            finer = &separators[position + 1..];
            break;
        }
    }

    let mut windows = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < config.max_chars {
            pending.push(piece);
            continue;
        }

        if !pending.is_empty() {
            windows.extend(merge_pieces(&pending, config));
            pending.clear();
        }

        if finer.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                windows.push(trimmed.to_string());
            }
        } else {
            windows.extend(split_recursive(piece, finer, config));
        }
    }

    if !pending.is_empty() {
        windows.extend(merge_pieces(&pending, config));
    }

    windows
}

/// Each separator occurrence stays attached to the start of the piece after it.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(index, c)| &text[index..index + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(&text[start..index]);
        }
        start = index;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn merge_pieces(pieces: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut windows = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);

        if total + len > config.max_chars && !current.is_empty() {
            push_window(&mut windows, &current);
            while total > config.overlap_chars || (total + len > config.max_chars && total > 0) {
                let Some(front) = current.pop_front() else {
                    break;
                };
                total -= char_len(front);
            }
        }

        current.push_back(piece);
        total += len;
    }

    push_window(&mut windows, &current);
    windows
}

fn push_window(windows: &mut Vec<String>, current: &VecDeque<&str>) {
    let joined: String = current.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Renders one file's triples and cuts them into tagged chunks. Returns the
/// chunks and the next free chunk index.
pub fn build_file_chunks(
    file_name: &str,
    triples: &[Triple],
    options: &IngestionOptions,
    global_index: u64,
) -> Result<(Vec<TripleChunk>, u64), IngestError> {
    let config = ChunkingConfig::from(*options);
    config.validate()?;

    if triples.is_empty() {
        return Ok((Vec::new(), global_index));
    }

    let document = render_document(triples);
    let mut chunks = Vec::new();
    let mut cursor = global_index;

    for content in split_text(&document, config) {
        chunks.push(TripleChunk {
            chunk_id: make_chunk_id(file_name, cursor, &content),
            chunk_index: cursor,
            content,
            metadata: ChunkMetadata {
                file: file_name.to_string(),
            },
        });
        cursor = cursor.saturating_add(1);
    }

    Ok((chunks, cursor))
}

fn make_chunk_id(file_name: &str, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_name.as_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_chars: usize, overlap_chars: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_chars,
            overlap_chars,
        }
    }

    fn long_document(lines: usize) -> (Vec<Triple>, String) {
        let triples: Vec<Triple> = (0..lines)
            .map(|index| Triple::new(format!("Wall-{index}"), "hasHeight", format!("{index}.5")))
            .collect();
        let document = render_document(&triples);
        (triples, document)
    }

    #[test]
    fn two_triples_make_one_chunk() {
        let triples = vec![
            Triple::new("Wall-1", "hasMaterial", "Concrete"),
            Triple::new("Wall-1", "hasHeight", "3.0m"),
        ];

        let (chunks, next) =
            build_file_chunks("house.ifc", &triples, &IngestionOptions::default(), 0).unwrap();

        assert_eq!(next, 1);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].content,
            "Wall-1 HASMATERIAL Concrete.\nWall-1 HASHEIGHT 3.0m."
        );
        assert_eq!(chunks[0].metadata.file, "house.ifc");
    }

    #[test]
    fn short_document_is_a_single_window() {
        let (_, document) = long_document(5);
        let windows = split_text(&document, config(500, 50));
        assert_eq!(windows, vec![document]);
    }

    #[test]
    fn long_document_windows_are_bounded_and_cover_every_line() {
        let (_, document) = long_document(120);
        let windows = split_text(&document, config(500, 50));

        assert!(windows.len() > 1);
        assert!(windows.iter().all(|window| window.chars().count() <= 500));
        for line in document.lines() {
            assert!(
                windows.iter().any(|window| window.contains(line)),
                "line dropped: {line}"
            );
        }
    }

    #[test]
    fn consecutive_windows_overlap_on_whole_lines() {
        let (_, document) = long_document(120);
        let windows = split_text(&document, config(500, 50));

        for pair in windows.windows(2) {
            let carried = pair[1].lines().next().unwrap();
            assert!(pair[0].lines().any(|line| line == carried));
        }
    }

    #[test]
    fn unbroken_text_falls_back_to_hard_cuts() {
        let text = "a".repeat(1_200);
        let windows = split_text(&text, config(500, 50));

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].len(), 500);
        assert_eq!(windows[1].len(), 500);
        assert_eq!(windows[2].len(), 300);
    }

    #[test]
    fn window_size_counts_characters_not_bytes() {
        let text = "ä".repeat(40);
        let windows = split_text(&text, config(10, 2));
        assert!(windows.iter().all(|window| window.chars().count() <= 10));
        assert!(windows.len() >= 4);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        let options = IngestionOptions {
            chunk_max_chars: 50,
            chunk_overlap_chars: 50,
        };
        let triples = vec![Triple::new("a", "b", "c")];
        assert!(matches!(
            build_file_chunks("x.ifc", &triples, &options, 0),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }

    #[test]
    fn chunk_indices_continue_from_cursor() {
        let (triples, _) = long_document(120);
        let (chunks, next) =
            build_file_chunks("a.ifc", &triples, &IngestionOptions::default(), 7).unwrap();

        assert_eq!(chunks[0].chunk_index, 7);
        assert_eq!(next, 7 + chunks.len() as u64);
        assert_ne!(chunks[0].chunk_id, chunks[1].chunk_id);
    }
}
