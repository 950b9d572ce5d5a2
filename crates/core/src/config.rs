pub const DEFAULT_BUCKET: &str = "hackathondataq";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SOURCE_PREFIX: &str = "ifc-data/";
pub const DEFAULT_INDEX_PREFIX: &str = "vector_store/faiss_index";
pub const DEFAULT_SECRET_NAME: &str = "hackathon/gemini/api_key";
pub const DEFAULT_TOP_K: usize = 12;
pub const DEFAULT_MAX_HISTORY_TURNS: usize = 10;
pub const DEFAULT_MAX_SESSIONS: usize = 1_000;

/// Where source models are read from and where the index artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub bucket: String,
    pub region: String,
    /// Custom S3-compatible endpoint; `None` means AWS.
    pub endpoint: Option<String>,
    pub source_prefix: String,
    pub index_prefix: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_BUCKET.to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            source_prefix: DEFAULT_SOURCE_PREFIX.to_string(),
            index_prefix: DEFAULT_INDEX_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub secret_name: String,
    pub top_k: usize,
    pub max_history_turns: usize,
    pub max_sessions: usize,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            top_k: DEFAULT_TOP_K,
            max_history_turns: DEFAULT_MAX_HISTORY_TURNS,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}
