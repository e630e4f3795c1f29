use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use clap::Parser;
use pagecite::config::{CredentialArgs, EmbeddingArgs, GenerationArgs, RetrievalArgs, StoreArgs};
use pagecite::ingest::IngestOutcomes;
use pagecite::{
    ensure_pdf, telemetry, Answer, Document, DocumentId, DocumentStore, Embedder, Error,
    Generator, IngestJob, IngestOutcome, IngestQueue, LopdfExtractor, MemoryStore, Pipeline,
    VectorStore,
};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

#[derive(Parser, Debug)]
#[command(
    name = "pagecite-server",
    about = "HTTP API for uploading PDFs and asking cited questions about them"
)]
struct ServerCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "PAGECITE_BIND", default_value = "127.0.0.1:8000")]
    bind: String,

    /// Keep documents and chunks in process memory instead of Postgres.
    #[arg(long, default_value_t = false)]
    in_memory: bool,

    /// Uploads waiting for ingestion before new ones are refused.
    #[arg(long, env = "PAGECITE_QUEUE_CAPACITY", default_value_t = 16)]
    queue_capacity: usize,

    /// Largest accepted upload in megabytes.
    #[arg(long, env = "PAGECITE_MAX_UPLOAD_MB", default_value_t = 25)]
    max_upload_mb: usize,

    /// Directory for staged uploads (defaults to the system temp dir).
    #[arg(long, env = "PAGECITE_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Browser origins allowed to call the API (comma separated).
    #[arg(
        long = "cors-origin",
        env = "PAGECITE_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000"
    )]
    cors_origins: Vec<String>,

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

struct AppState<E, S, G> {
    pipeline: Arc<Pipeline<E, S, G>>,
    queue: IngestQueue,
    staging_dir: Option<PathBuf>,
}

impl<E, S, G> Clone for AppState<E, S, G> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            queue: self.queue.clone(),
            staging_dir: self.staging_dir.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    document_id: Option<DocumentId>,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    document_id: DocumentId,
    filename: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct CountResponse {
    documents_count: u64,
}

#[derive(Debug, Serialize)]
struct DbCheckResponse {
    status: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();
    let cli = ServerCli::parse();
    let embedder = cli
        .embedding
        .build_embedder(&cli.credentials)
        .context("failed to build embedding client")?;
    let generator = cli
        .generation
        .build_generator(&cli.credentials)
        .context("failed to build generation client")?;
    let config = cli.retrieval.build_pipeline_config();
    tracing::info!(
        embedding = embedder.provider(),
        generation = generator.provider(),
        top_k = config.top_k,
        min_similarity = config.min_similarity,
        "clients ready"
    );

    if cli.in_memory {
        let store = MemoryStore::new(cli.embedding.embedding_dimension);
        let pipeline = Pipeline::new(embedder, store, generator, config)?;
        serve(&cli, pipeline).await
    } else {
        let store = cli
            .store
            .connect(cli.embedding.embedding_dimension)
            .await
            .context("failed to connect to Postgres")?;
        let pipeline = Pipeline::new(embedder, store, generator, config)?;
        serve(&cli, pipeline).await
    }
}

async fn serve<E, S, G>(cli: &ServerCli, pipeline: Pipeline<E, S, G>) -> Result<()>
where
    E: Embedder + 'static,
    S: DocumentStore + VectorStore + 'static,
    G: Generator + 'static,
{
    let pipeline = Arc::new(pipeline);
    let (queue, outcomes, _worker) =
        IngestQueue::spawn(Arc::clone(&pipeline), LopdfExtractor, cli.queue_capacity);
    tokio::spawn(log_outcomes(outcomes));

    let state = AppState {
        pipeline,
        queue,
        staging_dir: cli.staging_dir.clone(),
    };
    let cors = cors_layer(&cli.cors_origins)?;
    let app = router(state)
        .layer(DefaultBodyLimit::max(upload_limit_bytes(cli.max_upload_mb)))
        .layer(cors);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    tracing::info!(%addr, "pagecite-server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown")?;
    Ok(())
}

fn router<E, S, G>(state: AppState<E, S, G>) -> Router
where
    E: Embedder + 'static,
    S: DocumentStore + VectorStore + 'static,
    G: Generator + 'static,
{
    Router::new()
        .route("/healthz", get(healthz))
        .route("/db-check", get(db_check::<E, S, G>))
        .route("/upload", post(upload_handler::<E, S, G>))
        .route("/upload/{id}", delete(delete_handler::<E, S, G>))
        .route("/chat", post(chat_handler::<E, S, G>))
        .route("/documents/count", get(count_handler::<E, S, G>))
        .route(
            "/documents/{id}",
            get(document_handler::<E, S, G>).delete(delete_handler::<E, S, G>),
        )
        .with_state(state)
}

/// Credentialed CORS for the listed origins; methods and headers mirror the
/// preflight request.
fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

fn upload_limit_bytes(max_upload_mb: usize) -> usize {
    max_upload_mb.max(1).saturating_mul(1024 * 1024)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
    }
    tracing::info!("shutting down");
}

async fn log_outcomes(mut outcomes: IngestOutcomes) {
    while let Some(outcome) = outcomes.recv().await {
        match outcome {
            IngestOutcome::Completed(report) => tracing::info!(
                document_id = report.document_id,
                pages = report.pages,
                chunks = report.chunks,
                "document ready"
            ),
            IngestOutcome::Failed { document_id, error } => {
                tracing::warn!(document_id, %error, "document could not be ingested")
            }
        }
    }
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn db_check<E, S, G>(
    State(state): State<AppState<E, S, G>>,
) -> Result<Json<DbCheckResponse>, ApiError>
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    state
        .pipeline
        .count_documents()
        .await
        .map_err(|err| service_unavailable(err.to_string()))?;
    Ok(Json(DbCheckResponse {
        status: "success",
        message: "Database connection is working".to_string(),
    }))
}

async fn upload_handler<E, S, G>(
    State(state): State<AppState<E, S, G>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError>
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    let (filename, bytes) = read_file_field(&mut multipart).await?;
    ensure_pdf(&bytes).map_err(|err| bad_request(err.to_string()))?;

    let document_id = state
        .pipeline
        .create_document(&filename)
        .await
        .map_err(pipeline_error)?;
    let file = match stage_upload(state.staging_dir.clone(), bytes).await {
        Ok(file) => file,
        Err(err) => {
            discard_document(&state, document_id).await;
            return Err(internal_error(format!("failed to stage upload: {err}")));
        }
    };
    if let Err(err) = state.queue.submit(IngestJob { document_id, file }) {
        discard_document(&state, document_id).await;
        return Err(service_unavailable(err.to_string()));
    }
    tracing::info!(document_id, %filename, "upload accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            document_id,
            filename,
            status: "processing",
        }),
    ))
}

async fn chat_handler<E, S, G>(
    State(state): State<AppState<E, S, G>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Answer>, ApiError>
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    let answer = state
        .pipeline
        .answer(&request.message, request.document_id)
        .await
        .map_err(pipeline_error)?;
    Ok(Json(answer))
}

async fn count_handler<E, S, G>(
    State(state): State<AppState<E, S, G>>,
) -> Result<Json<CountResponse>, ApiError>
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    let documents_count = state
        .pipeline
        .count_documents()
        .await
        .map_err(pipeline_error)?;
    Ok(Json(CountResponse { documents_count }))
}

async fn document_handler<E, S, G>(
    State(state): State<AppState<E, S, G>>,
    Path(id): Path<DocumentId>,
) -> Result<Json<Document>, ApiError>
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    match state.pipeline.get_document(id).await.map_err(pipeline_error)? {
        Some(document) => Ok(Json(document)),
        None => Err(not_found(format!("document {id} does not exist"))),
    }
}

async fn delete_handler<E, S, G>(
    State(state): State<AppState<E, S, G>>,
    Path(id): Path<DocumentId>,
) -> Result<StatusCode, ApiError>
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    match state.pipeline.delete_document(id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(err) if err.is_invalid_input() => Err(not_found(err.to_string())),
        Err(err) => Err(pipeline_error(err)),
    }
}

async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Bytes), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| bad_request(err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "upload.pdf".to_string());
        let bytes = field
            .bytes()
            .await
            .map_err(|err| bad_request(err.body_text()))?;
        return Ok((filename, bytes));
    }
    Err(bad_request("multipart field `file` is required"))
}

async fn stage_upload(dir: Option<PathBuf>, bytes: Bytes) -> io::Result<TempPath> {
    tokio::task::spawn_blocking(move || {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pagecite-").suffix(".pdf");
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(file.into_temp_path())
    })
    .await
    .map_err(io::Error::other)?
}

async fn discard_document<E, S, G>(state: &AppState<E, S, G>, document_id: DocumentId)
where
    E: Embedder,
    S: DocumentStore + VectorStore,
    G: Generator,
{
    if let Err(err) = state.pipeline.delete_document(document_id).await {
        tracing::error!(document_id, error = %err, "failed to discard document row");
    }
}

fn pipeline_error(err: Error) -> ApiError {
    if err.is_invalid_input() {
        bad_request(err.to_string())
    } else {
        tracing::error!(error = %err, "request failed");
        bad_gateway(err.to_string())
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, message)
}

fn not_found(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::NOT_FOUND, message)
}

fn bad_gateway(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::BAD_GATEWAY, message)
}

fn service_unavailable(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::SERVICE_UNAVAILABLE, message)
}

fn internal_error(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use pagecite::{EmbeddingError, EmbeddingIntent, GenerationError, PipelineConfig, StorageError};
    use serde_json::json;
    use tower::ServiceExt;

    const FRONTEND: &str = "http://localhost:3000";

    struct FlatEmbedder;

    impl Embedder for FlatEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        async fn embed(
            &self,
            _text: &str,
            _intent: EmbeddingIntent,
        ) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct SilentGenerator;

    impl Generator for SilentGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            Ok(String::new())
        }
    }

    type TestState = AppState<FlatEmbedder, MemoryStore, SilentGenerator>;

    fn test_state() -> TestState {
        let pipeline = Pipeline::new(
            FlatEmbedder,
            MemoryStore::new(2),
            SilentGenerator,
            PipelineConfig::default(),
        )
        .unwrap();
        let pipeline = Arc::new(pipeline);
        let (queue, _outcomes, _worker) =
            IngestQueue::spawn(Arc::clone(&pipeline), LopdfExtractor, 1);
        AppState {
            pipeline,
            queue,
            staging_dir: None,
        }
    }

    fn app(state: TestState) -> Router {
        router(state).layer(cors_layer(&[FRONTEND.to_string()]).unwrap())
    }

    #[tokio::test]
    async fn preflight_from_the_frontend_is_allowed() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/chat")
            .header(header::ORIGIN, FRONTEND)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();
        let response = app(test_state()).oneshot(request).await.unwrap();
        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            FRONTEND
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            "POST"
        );
    }

    #[tokio::test]
    async fn unknown_origins_get_no_cors_headers() {
        let request = Request::builder()
            .uri("/healthz")
            .header(header::ORIGIN, "http://evil.example")
            .body(Body::empty())
            .unwrap();
        let response = app(test_state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn upload_path_also_deletes_documents() {
        let state = test_state();
        let id = state.pipeline.create_document("paper.pdf").await.unwrap();
        let app = app(state.clone());

        let delete = |id: DocumentId| {
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/upload/{id}"))
                .header(header::ORIGIN, FRONTEND)
                .body(Body::empty())
                .unwrap()
        };
        let response = app.clone().oneshot(delete(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            FRONTEND
        );
        assert!(state.pipeline.get_document(id).await.unwrap().is_none());

        let response = app.oneshot(delete(id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_cors_origin_is_rejected() {
        assert!(cors_layer(&["bad\norigin".to_string()]).is_err());
    }

    #[test]
    fn huge_upload_limits_saturate() {
        assert_eq!(upload_limit_bytes(0), 1024 * 1024);
        assert_eq!(upload_limit_bytes(25), 25 * 1024 * 1024);
        assert_eq!(upload_limit_bytes(usize::MAX), usize::MAX);
    }

    #[test]
    fn chat_request_document_is_optional() {
        let request: ChatRequest = serde_json::from_value(json!({"message": "hi"})).unwrap();
        assert_eq!(request.message, "hi");
        assert_eq!(request.document_id, None);
        let scoped: ChatRequest =
            serde_json::from_value(json!({"message": "hi", "document_id": 7})).unwrap();
        assert_eq!(scoped.document_id, Some(7));
    }

    #[test]
    fn upload_response_reports_processing() {
        let body = UploadResponse {
            document_id: 3,
            filename: "paper.pdf".into(),
            status: "processing",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"document_id": 3, "filename": "paper.pdf", "status": "processing"})
        );
    }

    #[test]
    fn invalid_input_maps_to_bad_request() {
        let (status, Json(body)) = pipeline_error(Error::invalid_input("question must not be empty"));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.message, "invalid input: question must not be empty");
    }

    #[test]
    fn service_failures_map_to_bad_gateway() {
        let (status, _) = pipeline_error(Error::Embedding(EmbeddingError::Status {
            status: 500,
            body: "boom".into(),
        }));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let (status, _) = pipeline_error(Error::Storage(StorageError::MissingDocument(1)));
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn staged_upload_is_a_pdf_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = stage_upload(Some(dir.path().to_path_buf()), Bytes::from_static(b"%PDF-1.4"))
            .await
            .unwrap();
        assert!(path.extension().is_some_and(|ext| ext == "pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
        let kept = path.to_path_buf();
        drop(path);
        assert!(!kept.exists());
    }
}
