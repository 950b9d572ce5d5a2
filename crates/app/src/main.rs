mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use ifc_rag_core::{
    extract_kg_triples, initialize, render_document, run_index_job, AnswerModel, AwsCredentials,
    CharacterNgramEmbedder, ChatService, Embedder, FlatIndex, GeminiClient, IngestionOptions,
    LlmSettings, LocalStore, ObjectStore, S3Store, SecretSource, SecretsManager, ServiceSettings,
    ServiceState, StaticSecret, StorageSettings, TeiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_TEI_DIMENSIONS, DEFAULT_TEI_MODEL,
};
use ifc_rag_core::config::{
    DEFAULT_BUCKET, DEFAULT_INDEX_PREFIX, DEFAULT_REGION, DEFAULT_SECRET_NAME,
    DEFAULT_SOURCE_PREFIX, DEFAULT_TOP_K,
};
use ifc_rag_core::llm::DEFAULT_GEMINI_MODEL;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ifc-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    storage: StorageArgs,

    #[command(flatten)]
    models: ModelArgs,
}

#[derive(Args)]
struct StorageArgs {
    /// S3 bucket holding source models and the index artifact
    #[arg(long, env = "IFC_RAG_BUCKET", default_value = DEFAULT_BUCKET, global = true)]
    bucket: String,

    /// AWS region for S3 and Secrets Manager
    #[arg(long, env = "AWS_REGION", default_value = DEFAULT_REGION, global = true)]
    region: String,

    /// S3-compatible endpoint (MinIO, LocalStack); path-style addressing
    #[arg(long, env = "IFC_RAG_S3_ENDPOINT", global = true)]
    s3_endpoint: Option<String>,

    /// Use a local directory as the bucket instead of S3
    #[arg(long, env = "IFC_RAG_LOCAL_STORE", global = true)]
    local_store: Option<PathBuf>,

    /// Key prefix of the source .ifc files
    #[arg(long, env = "IFC_RAG_SOURCE_PREFIX", default_value = DEFAULT_SOURCE_PREFIX, global = true)]
    source_prefix: String,

    /// Key prefix of the index artifact
    #[arg(long, env = "IFC_RAG_INDEX_PREFIX", default_value = DEFAULT_INDEX_PREFIX, global = true)]
    index_prefix: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderKind {
    /// Offline hashed character trigrams
    Ngram,
    /// Text Embeddings Inference server
    Tei,
}

#[derive(Args)]
struct ModelArgs {
    /// Secrets Manager secret holding the Gemini API key
    #[arg(long, env = "IFC_RAG_SECRET_NAME", default_value = DEFAULT_SECRET_NAME, global = true)]
    secret_name: String,

    /// Gemini API key; skips Secrets Manager when set
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[arg(long, env = "IFC_RAG_EMBEDDER", value_enum, default_value_t = EmbedderKind::Ngram, global = true)]
    embedder: EmbedderKind,

    /// Base URL of the TEI server
    #[arg(long, env = "IFC_RAG_TEI_URL", default_value = "http://localhost:8080", global = true)]
    tei_url: String,

    #[arg(long, env = "IFC_RAG_TEI_MODEL", default_value = DEFAULT_TEI_MODEL, global = true)]
    tei_model: String,

    #[arg(long, env = "IFC_RAG_TEI_DIMENSIONS", default_value_t = DEFAULT_TEI_DIMENSIONS, global = true)]
    tei_dimensions: usize,

    #[arg(long, env = "IFC_RAG_LLM_MODEL", default_value = DEFAULT_GEMINI_MODEL, global = true)]
    llm_model: String,
}

#[derive(Subcommand)]
enum Command {
    /// Extract, chunk and embed every source model, then upload the index.
    Index {
        /// Scratch directory; a temporary one is used when omitted.
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Print the rendered triples of one model file.
    Extract {
        #[arg(long)]
        file: PathBuf,
    },
    /// Query a local index directory.
    Search {
        #[arg(long)]
        index_dir: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
    /// Serve the chat endpoint.
    Serve {
        #[arg(long, env = "IFC_RAG_BIND", default_value = "0.0.0.0:8000")]
        bind: String,
        #[arg(long, env = "IFC_RAG_TOP_K", default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
}

impl StorageArgs {
    fn settings(&self) -> StorageSettings {
        StorageSettings {
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint: self.s3_endpoint.clone(),
            source_prefix: self.source_prefix.clone(),
            index_prefix: self.index_prefix.clone(),
        }
    }

    async fn open(&self) -> anyhow::Result<Box<dyn ObjectStore>> {
        if let Some(root) = &self.local_store {
            return Ok(Box::new(LocalStore::new(root)));
        }

        let credentials = AwsCredentials::resolve().await?;
        let store = S3Store::new(&self.bucket, &self.region, credentials);
        let store = match &self.s3_endpoint {
            Some(endpoint) => store
                .with_endpoint(endpoint)
                .with_context(|| format!("invalid S3 endpoint {endpoint}"))?,
            None => store,
        };
        Ok(Box::new(store))
    }
}

impl ModelArgs {
    fn embedder(&self) -> Arc<dyn Embedder> {
        match self.embedder {
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder {
                dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            }),
            EmbedderKind::Tei => Arc::new(TeiEmbedder::new(
                &self.tei_url,
                &self.tei_model,
                self.tei_dimensions,
            )),
        }
    }

    async fn secrets(&self, region: &str) -> anyhow::Result<Box<dyn SecretSource>> {
        match &self.api_key {
            Some(key) => Ok(Box::new(StaticSecret::new(key))),
            None => Ok(Box::new(SecretsManager::new(
                region,
                AwsCredentials::resolve().await?,
            ))),
        }
    }

    fn llm_settings(&self) -> LlmSettings {
        LlmSettings {
            model: self.llm_model.clone(),
            ..LlmSettings::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "ifc-rag boot"
    );

    match &cli.command {
        Command::Index { work_dir } => run_index(&cli, work_dir.clone()).await,
        Command::Extract { file } => {
            let triples = extract_kg_triples(file)
                .with_context(|| format!("failed to extract {}", file.display()))?;
            info!(file = %file.display(), triples = triples.len(), "extracted");
            println!("{}", render_document(&triples));
            Ok(())
        }
        Command::Search {
            index_dir,
            query,
            top_k,
        } => run_search(&cli, index_dir, query, *top_k).await,
        Command::Serve { bind, top_k } => run_serve(&cli, bind, *top_k).await,
    }
}

async fn run_index(cli: &Cli, work_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let store = cli.storage.open().await?;
    let embedder = cli.models.embedder();

    let scratch;
    let work_path = match work_dir {
        Some(dir) => dir,
        None => {
            scratch = tempfile::tempdir()?;
            scratch.path().to_path_buf()
        }
    };

    let report = run_index_job(
        store.as_ref(),
        &cli.storage.settings(),
        embedder.as_ref(),
        IngestionOptions::default(),
        &work_path,
    )
    .await?;

    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped model");
    }
    println!(
        "{} chunks from {}/{} models indexed with {} and uploaded to {}/{} at {}",
        report.chunk_count,
        report.processed_files,
        report.source_files,
        report.manifest.embedder,
        store.describe(),
        cli.storage.index_prefix,
        Utc::now().to_rfc3339()
    );
    Ok(())
}

async fn run_search(
    cli: &Cli,
    index_dir: &Path,
    query: &str,
    top_k: usize,
) -> anyhow::Result<()> {
    let index = FlatIndex::load(index_dir)
        .with_context(|| format!("failed to load index from {}", index_dir.display()))?;
    let embedder = cli.models.embedder();
    if index.manifest().embedder != embedder.model_id() {
        anyhow::bail!(
            "index was built with {} but the configured embedder is {}",
            index.manifest().embedder,
            embedder.model_id()
        );
    }

    let vector = embedder.embed(query).await?;
    println!("query: {query}");
    for hit in index.search(&vector, top_k)? {
        println!(
            "score={:.4} file={} chunk={}",
            hit.score, hit.chunk.metadata.file, hit.chunk.chunk_id
        );
        println!("{}\n", hit.chunk.content);
    }
    Ok(())
}

async fn prepare_service(cli: &Cli, top_k: usize) -> anyhow::Result<ChatService> {
    let store = cli.storage.open().await?;
    let secrets = cli.models.secrets(&cli.storage.region).await?;
    let llm_settings = cli.models.llm_settings();
    let service_settings = ServiceSettings {
        secret_name: cli.models.secret_name.clone(),
        top_k,
        ..ServiceSettings::default()
    };

    let service = initialize(
        &cli.storage.settings(),
        &service_settings,
        store.as_ref(),
        secrets.as_ref(),
        cli.models.embedder(),
        move |api_key| Arc::new(GeminiClient::new(llm_settings, api_key)) as Arc<dyn AnswerModel>,
    )
    .await?;
    Ok(service)
}

async fn run_serve(cli: &Cli, bind: &str, top_k: usize) -> anyhow::Result<()> {
    let state = ServiceState::from_setup(
        prepare_service(cli, top_k)
            .await
            .map_err(|error| format!("{error:#}")),
    );
    match &state {
        ServiceState::Ready(_) => info!("chat service ready"),
        ServiceState::Degraded { reason } => {
            error!(%reason, "initialization failed; serving in degraded mode")
        }
    }

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(address = %bind, "listening");

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
