use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chartcode::config::{self, AppConfig, APP_NAME, APP_VERSION};
use chartcode::pipeline::coding::CptCatalog;
use chartcode::pipeline::embedding::RelevanceScorer;
use chartcode::pipeline::llm::OllamaClient;
use chartcode::pipeline::{process_batch, BatchResult, ClinicalNote, PipelineContext};

#[derive(Parser, Debug)]
#[command(name = "chartcode", version)]
#[command(about = "Draft CPT/ICD-10 billing rows from clinical note text")]
struct Args {
    /// CPT to ICD-10 mapping table (CSV with CPT, CPT Description, ICD-10 Code, ICD-10 Description)
    #[arg(long)]
    mapping: PathBuf,

    /// Write billing rows here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Write the per-note audit trail as JSON
    #[arg(long)]
    audit: Option<PathBuf>,

    /// Ollama model name (overrides CHARTCODE_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Ollama base URL (overrides CHARTCODE_OLLAMA_URL)
    #[arg(long)]
    ollama_url: Option<String>,

    /// ICD shortlist size (overrides CHARTCODE_TOP_K)
    #[arg(long)]
    top_k: Option<usize>,

    /// Rerank ICD candidates with the cross-encoder
    #[arg(long)]
    cross_encoder: bool,

    /// Pre-extracted note text files, one note per file
    #[arg(required = true)]
    notes: Vec<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.model_name = model.clone();
        }
        if let Some(url) = &self.ollama_url {
            config.ollama_url = url.clone();
        }
        if let Some(top_k) = self.top_k.filter(|k| *k > 0) {
            config.top_k = top_k;
        }
        if self.cross_encoder {
            config.use_cross_encoder = true;
        }
    }
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    args.apply(&mut config);

    tracing::info!("{APP_NAME} starting v{APP_VERSION}");

    let catalog = CptCatalog::from_csv_path(&args.mapping)?;
    let llm = OllamaClient::new(&config.ollama_url, config.request_timeout_secs)?;

    let mut ctx = PipelineContext::new(Box::new(llm), catalog, config.pipeline_settings())?;
    ctx = attach_embeddings(ctx, &config)?;
    if config.use_cross_encoder {
        ctx = ctx.with_cross_encoder(build_cross_encoder(&config)?);
    }

    let notes = read_notes(&args.notes)?;
    let result = process_batch(&ctx, &notes)?;

    write_rows(&result, args.output.as_deref())?;
    if let Some(path) = &args.audit {
        write_audit(&result, path)?;
    }

    if result.notes_errored > 0 {
        tracing::warn!(
            errored = result.notes_errored,
            "Some notes could not be coded; see the Comments column"
        );
    }

    Ok(())
}

#[cfg(feature = "onnx-embeddings")]
fn attach_embeddings(ctx: PipelineContext, config: &AppConfig) -> anyhow::Result<PipelineContext> {
    use chartcode::pipeline::embedding::{IcdEmbeddingStore, OnnxEmbedder};

    let embedder = OnnxEmbedder::load(&config.embedding_model_dir).with_context(|| {
        format!(
            "Cannot load embedding model from {}",
            config.embedding_model_dir.display()
        )
    })?;
    let store = IcdEmbeddingStore::build(ctx.catalog(), &embedder)?;
    Ok(ctx.with_embeddings(Box::new(embedder), store)?)
}

#[cfg(not(feature = "onnx-embeddings"))]
fn attach_embeddings(ctx: PipelineContext, _config: &AppConfig) -> anyhow::Result<PipelineContext> {
    tracing::info!("Built without onnx-embeddings; ICD shortlists follow catalog order");
    Ok(ctx)
}

#[cfg(feature = "onnx-embeddings")]
fn build_cross_encoder(
    config: &AppConfig,
) -> anyhow::Result<Box<dyn RelevanceScorer + Send + Sync>> {
    let scorer =
        chartcode::pipeline::embedding::OnnxCrossEncoder::load(&config.cross_encoder_model_dir)
            .with_context(|| {
                format!(
                    "Cannot load cross-encoder from {}",
                    config.cross_encoder_model_dir.display()
                )
            })?;
    Ok(Box::new(scorer))
}

#[cfg(not(feature = "onnx-embeddings"))]
fn build_cross_encoder(
    _config: &AppConfig,
) -> anyhow::Result<Box<dyn RelevanceScorer + Send + Sync>> {
    tracing::warn!("Built without onnx-embeddings; cross-encoder falls back to token overlap");
    Ok(Box::new(chartcode::pipeline::embedding::TokenOverlapScorer))
}

fn read_notes(paths: &[PathBuf]) -> anyhow::Result<Vec<ClinicalNote>> {
    paths
        .iter()
        .map(|path| {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Cannot read note {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(ClinicalNote::new(filename, text))
        })
        .collect()
}

fn write_rows(result: &BatchResult, output: Option<&Path>) -> anyhow::Result<()> {
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(
            fs::File::create(path)
                .with_context(|| format!("Cannot create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    let mut writer = csv::Writer::from_writer(sink);
    for row in result.rows() {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_audit(result: &BatchResult, path: &Path) -> anyhow::Result<()> {
    let audits: Vec<_> = result.outcomes.iter().map(|o| &o.audit).collect();
    let json = serde_json::to_string_pretty(&audits)?;
    fs::write(path, json).with_context(|| format!("Cannot write audit to {}", path.display()))?;
    tracing::info!(path = %path.display(), notes = audits.len(), "Audit trail written");
    Ok(())
}
