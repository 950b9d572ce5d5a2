use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("step parse error at statement {statement}: {details}")]
    StepParse { statement: usize, details: String },

    #[error("not a STEP physical file: {0}")]
    NotStep(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("no source files found under {0}")]
    NoSourceFiles(String),

    #[error("no chunks produced from {files} file(s); {skipped} skipped")]
    NoChunks { files: usize, skipped: usize },

    #[error("embedding failed: {0}")]
    Embedding(#[from] SearchError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("{operation} failed for {target} (HTTP {status}): {details}")]
    Backend {
        operation: &'static str,
        target: String,
        status: u16,
        details: String,
    },

    #[error("malformed response from {service}: {details}")]
    MalformedResponse { service: &'static str, details: String },

    #[error("object key escapes its prefix: {0}")]
    InvalidKey(String),

    #[error("secret {0} has no string value")]
    EmptySecret(String),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("index file missing: {0}")]
    MissingFile(String),

    #[error("unsupported index format version {0}")]
    UnsupportedVersion(u32),

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index is inconsistent: {0}")]
    Corrupt(String),

    #[error("cannot build an index without chunks")]
    Empty,
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("secret unavailable: {0}")]
    Secret(StorageError),

    #[error("index download failed: {0}")]
    Storage(#[from] StorageError),

    #[error("no index artifact found under {0}")]
    EmptyIndex(String),

    #[error("index load failed: {0}")]
    IndexLoad(#[from] IndexError),

    #[error("embedder {runtime} does not match index built with {indexed}")]
    EmbedderMismatch { indexed: String, runtime: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("question must not be empty")]
    EmptyQuestion,

    #[error("retrieval failed: {0}")]
    Retrieval(SearchError),

    #[error("answer generation failed: {0}")]
    Answer(SearchError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
