use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docqa_core::{
    new_document_id, CharacterNgramEmbedder, Document, Embedder, ExtractiveModel, LanguageModel,
    LocalIndexStore, OllamaClient, OllamaEmbedder, OllamaLanguageModel, QaConfig, QaResponse,
    QueryOrchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Orchestrator = QueryOrchestrator<LocalIndexStore, dyn Embedder, dyn LanguageModel>;

#[derive(Parser)]
#[command(name = "docqa", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted document index.
    #[arg(long, env = "DOCQA_INDEX_DIR", default_value = ".docqa/index")]
    index_dir: PathBuf,

    /// JSON file overriding chunking, retrieval, timeout and retry settings.
    #[arg(long, env = "DOCQA_CONFIG")]
    config: Option<PathBuf>,

    /// Embedding backend.
    #[arg(long, value_enum, default_value_t = EmbedderKind::Local)]
    embedder: EmbedderKind,

    /// Answer generation backend.
    #[arg(long, value_enum, default_value_t = ModelKind::Extractive)]
    llm: ModelKind,

    /// Ollama base URL
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Ollama embedding model
    #[arg(long, default_value = "nomic-embed-text")]
    embed_model: String,

    /// Dimensions produced by the Ollama embedding model.
    #[arg(long, default_value = "768")]
    embed_dimensions: usize,

    /// Ollama generation model
    #[arg(long, default_value = "llama3.1")]
    generate_model: String,

    /// Per-request HTTP timeout for Ollama calls.
    #[arg(long, default_value = "120")]
    request_timeout_secs: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EmbedderKind {
    /// Offline character-trigram embeddings.
    Local,
    Ollama,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModelKind {
    /// Offline extractive answers quoting the best evidence sentence.
    Extractive,
    Ollama,
}

#[derive(Subcommand)]
enum Command {
    /// Index a plain-text document.
    Index {
        /// Text file to index.
        file: PathBuf,
        /// Document id; a new one is generated when omitted.
        #[arg(long)]
        document_id: Option<String>,
        /// Display title; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
    },
    /// Remove a document and its chunks from the index.
    Remove { document_id: String },
    /// Ask a question about one indexed document.
    Ask {
        document_id: String,
        question: String,
        /// Print the full response as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List indexed documents.
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => QaConfig::from_json_file(path)?,
        None => QaConfig::default(),
    };
    let orchestrator = build_orchestrator(&cli, config).await?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index_dir = %cli.index_dir.display(),
        "docqa boot"
    );

    match cli.command {
        Command::Index {
            file,
            document_id,
            title,
        } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("cannot read {}", file.display()))?;
            let title = title.or_else(|| {
                file.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            });
            let mut document = Document::new(document_id.unwrap_or_else(new_document_id), text);
            if let Some(title) = title {
                document = document.with_title(title);
            }

            let report = orchestrator.index(document).await?;
            if report.unchanged {
                println!(
                    "{} unchanged ({} chunks)",
                    report.document_id, report.chunk_count
                );
            } else {
                println!(
                    "{} indexed: {} chunks in {} ms",
                    report.document_id, report.chunk_count, report.elapsed_ms
                );
            }
        }
        Command::Remove { document_id } => {
            if orchestrator.remove_document(&document_id).await? {
                println!("{document_id} removed");
            } else {
                println!("{document_id} was not indexed");
            }
        }
        Command::Ask {
            document_id,
            question,
            json,
        } => {
            let response = orchestrator.answer_question(&document_id, &question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
        }
        Command::List { json } => {
            let documents = orchestrator.list_documents().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&documents)?);
            } else if documents.is_empty() {
                println!("no documents indexed");
            } else {
                for record in documents {
                    println!(
                        "{} title={} chunks={} model={} ingested_at={}",
                        record.document_id,
                        record.title.as_deref().unwrap_or("-"),
                        record.chunk_count,
                        record.embedding_model,
                        record.ingested_at.to_rfc3339()
                    );
                }
            }
        }
    }

    Ok(())
}

async fn build_orchestrator(cli: &Cli, config: QaConfig) -> anyhow::Result<Orchestrator> {
    let store = LocalIndexStore::open(&cli.index_dir)
        .await
        .with_context(|| format!("cannot open index at {}", cli.index_dir.display()))?;

    let ollama = || {
        OllamaClient::new(
            &cli.ollama_url,
            Duration::from_secs(cli.request_timeout_secs),
        )
    };

    let embedder: Arc<dyn Embedder> = match cli.embedder {
        EmbedderKind::Local => Arc::new(CharacterNgramEmbedder::default()),
        EmbedderKind::Ollama => Arc::new(OllamaEmbedder::new(
            ollama()?,
            cli.embed_model.clone(),
            cli.embed_dimensions,
        )),
    };
    let model: Arc<dyn LanguageModel> = match cli.llm {
        ModelKind::Extractive => Arc::new(ExtractiveModel::default()),
        ModelKind::Ollama => Arc::new(OllamaLanguageModel::new(
            ollama()?,
            cli.generate_model.clone(),
        )),
    };

    Ok(QueryOrchestrator::new(
        Arc::new(store),
        embedder,
        model,
        config,
    )?)
}

fn print_response(response: &QaResponse) {
    println!("question: {}", response.question);
    println!("answer: {}", response.answer.text);
    if !response.grounded() {
        println!("grounded: no");
        return;
    }
    println!("grounded: yes (cites {})", response.answer.chunk_ids.join(", "));
    for passage in &response.highlights {
        println!(
            "  [{}..{}] chunk={} \"{}\"",
            passage.start, passage.end, passage.chunk_id, passage.text
        );
    }
    for hit in &response.retrieved {
        println!(
            "  rank={} score={:.4} similarity={:.4} chunk={}",
            hit.rank, hit.score, hit.similarity, hit.chunk.chunk_id
        );
    }
    for timing in &response.stages {
        println!("  stage={} elapsed_ms={}", timing.stage, timing.elapsed_ms);
    }
}
