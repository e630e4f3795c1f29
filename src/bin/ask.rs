use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pagecite::answer::render_context;
use pagecite::config::{CredentialArgs, EmbeddingArgs, GenerationArgs, RetrievalArgs, StoreArgs};
use pagecite::{
    telemetry, Answer, DocumentId, DocumentStore, Embedder, Generator, LopdfExtractor,
    MemoryStore, Pipeline, VectorStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "pagecite-ask",
    about = "Ingest a PDF and/or ask a question answered with page citations"
)]
struct AskCli {
    /// PDF to ingest before answering
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Restrict retrieval to an already ingested document
    #[arg(long, conflicts_with = "pdf")]
    document_id: Option<DocumentId>,

    /// Question to answer
    #[arg(long)]
    query: Option<String>,

    /// Only print the retrieved context (skip the generation call)
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Print the answer as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Use a throwaway in-memory store instead of Postgres
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    #[command(flatten)]
    credentials: CredentialArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,

    #[command(flatten)]
    generation: GenerationArgs,

    #[command(flatten)]
    retrieval: RetrievalArgs,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = AskCli::parse();
    if cli.pdf.is_none() && cli.query.is_none() {
        bail!("nothing to do; pass --pdf, --query, or both");
    }
    if cli.in_memory && cli.pdf.is_none() {
        bail!("--in-memory starts empty; pass --pdf to ingest something first");
    }
    let embedder = cli
        .embedding
        .build_embedder(&cli.credentials)
        .context("failed to build embedding client")?;
    let generator = cli
        .generation
        .build_generator(&cli.credentials)
        .context("failed to build generation client")?;
    let config = cli.retrieval.build_pipeline_config();

    if cli.in_memory {
        let store = MemoryStore::new(cli.embedding.embedding_dimension);
        run(&cli, &Pipeline::new(embedder, store, generator, config)?).await
    } else {
        let store = cli
            .store
            .connect(cli.embedding.embedding_dimension)
            .await
            .context("failed to connect to Postgres")?;
        run(&cli, &Pipeline::new(embedder, store, generator, config)?).await
    }
}

async fn run<E, S, G>(cli: &AskCli, pipeline: &Pipeline<E, S, G>) -> Result<()>
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    let mut document_id = cli.document_id;
    if let Some(path) = &cli.pdf {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let id = pipeline.create_document(&filename).await?;
        let report = match pipeline.ingest_file(id, path, &LopdfExtractor).await {
            Ok(report) => report,
            Err(err) => {
                discard_document(pipeline, id).await;
                return Err(err).with_context(|| format!("failed to ingest {}", path.display()));
            }
        };
        println!(
            "ingested {} as document {} ({} pages, {} chunks)",
            filename, report.document_id, report.pages, report.chunks
        );
        document_id = Some(id);
    }

    let Some(query) = cli.query.as_deref() else {
        return Ok(());
    };

    if cli.dry_run {
        let retrieved = pipeline.retrieve(query, document_id).await?;
        println!("--- Retrieved Context ---\n{}\n", render_context(&retrieved));
        println!("dry-run enabled; skipping generation call.");
        return Ok(());
    }

    let answer = pipeline.answer(query, document_id).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print_answer(&answer);
    }
    Ok(())
}

/// Removes a document whose ingestion failed so no empty row is left behind.
async fn discard_document<E, S, G>(pipeline: &Pipeline<E, S, G>, document_id: DocumentId)
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    if let Err(err) = pipeline.delete_document(document_id).await {
        tracing::warn!(document_id, error = %err, "failed to discard document row");
    }
}

fn print_answer(answer: &Answer) {
    println!("--- Answer ---\n{}", answer.answer);
    if answer.citations.is_empty() {
        return;
    }
    println!("\n--- Sources ---");
    for citation in &answer.citations {
        let page = citation
            .page_number
            .map(|page| page.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("[page {page}] {}", citation.snippet);
    }
}
