//! HTTP server implementation using axum

use crate::error::{Error, ErrorKind, Result};
use crate::pdf::{GrayscaleConverter, MergeSource, QpdfWrapper};
use crate::staging::{JobStore, JobWriter};
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::header::{self, HeaderName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Environment variable for the listen address
pub const ENV_ADDR: &str = "PDF_TOOLKIT_ADDR";
/// Environment variable for the staging root
pub const ENV_STAGING_DIR: &str = "PDF_TOOLKIT_STAGING_DIR";
/// Environment variable for the request body ceiling
pub const ENV_MAX_UPLOAD_BYTES: &str = "PDF_TOOLKIT_MAX_UPLOAD_BYTES";

const MERGED_FILE_NAME: &str = "merged.pdf";
const FALLBACK_FILE_NAME: &str = "document.pdf";
const MERGE_INFO_HEADER: &str = "x-merge-info";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (default: 127.0.0.1:3000)
    pub bind_addr: SocketAddr,
    /// Directory holding one subdirectory per merge job
    pub staging_dir: PathBuf,
    /// Maximum request body size in bytes (default: 100MB)
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            staging_dir: std::env::temp_dir().join("pdf-toolkit"),
            max_upload_bytes: 100 * 1024 * 1024, // 100MB
        }
    }
}

impl ServerConfig {
    /// Read overrides from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from defaults plus whatever `lookup` returns
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup(ENV_ADDR) {
            config.bind_addr = addr.trim().parse().map_err(|e| Error::Config {
                reason: format!("{}={:?}: {}", ENV_ADDR, addr, e),
            })?;
        }

        if let Some(dir) = lookup(ENV_STAGING_DIR) {
            if dir.trim().is_empty() {
                return Err(Error::Config {
                    reason: format!("{} is empty", ENV_STAGING_DIR),
                });
            }
            config.staging_dir = PathBuf::from(dir);
        }

        if let Some(limit) = lookup(ENV_MAX_UPLOAD_BYTES) {
            config.max_upload_bytes = match limit.trim().parse::<usize>() {
                Ok(0) => {
                    return Err(Error::Config {
                        reason: format!("{} must be positive", ENV_MAX_UPLOAD_BYTES),
                    })
                }
                Ok(bytes) => bytes,
                Err(e) => {
                    return Err(Error::Config {
                        reason: format!("{}={:?}: {}", ENV_MAX_UPLOAD_BYTES, limit, e),
                    })
                }
            };
        }

        Ok(config)
    }
}

/// Shared, immutable state handed to every handler
#[derive(Clone)]
pub struct AppState {
    store: JobStore,
    grayscale: Arc<GrayscaleConverter>,
    config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_converter(config, GrayscaleConverter::default())
    }

    /// Use a custom grayscale strategy list
    pub fn with_converter(config: ServerConfig, converter: GrayscaleConverter) -> Self {
        Self {
            store: JobStore::new(config.staging_dir.clone()),
            grayscale: Arc::new(converter),
            config: Arc::new(config),
        }
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

/// Body returned by a successful upload
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: String,
}

/// Body of every error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Summary sent in the `X-Merge-Info` header
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeInfo {
    pub files_merged: usize,
    pub files_skipped: usize,
    pub total_pages: u32,
}

#[derive(Debug, Deserialize)]
pub struct MergeQuery {
    pub id: Option<String>,
}

/// A single-file form as sent to the unlock and grayscale endpoints
#[derive(Debug, Default)]
struct SingleFileForm {
    file: Option<(String, Bytes)>,
    password: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match (&self, self.kind()) {
            (Error::Multipart(e), _) => e.status(),
            (Error::MultipartRejection(e), _) => e.status(),
            (Error::QueryRejection(e), _) => e.status(),
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            (_, ErrorKind::Encryption) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::Processing) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = ErrorResponse {
            error: self.client_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the application router with all routes configured
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;
    Router::new()
        .route("/api/merge", post(upload_files).get(merge_files))
        .route("/api/pdf/unlock", post(unlock_pdf))
        .route("/api/pdf/grayscale", post(grayscale_pdf))
        .route("/api/health", get(health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Stage every file part of the request into a new job.
///
/// The job directory is only created once the first file part arrives.
async fn upload_files(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let mut multipart = multipart?;
    let mut writer: Option<JobWriter> = None;

    while let Some(field) = multipart.next_field().await? {
        let Some(original_name) = field.file_name().map(str::to_owned) else {
            continue;
        };

        let job = match &mut writer {
            Some(job) => job,
            None => writer.insert(state.store.create_job().await?),
        };
        if let Err(e) = job.stage_file(&original_name, field).await {
            tracing::warn!(job_id = %job.id(), error = %e, "upload aborted, job left in staging");
            return Err(e);
        }
    }

    let writer = writer.ok_or(Error::MissingField { field: "files" })?;
    let id = writer.commit().await?;
    Ok(Json(UploadResponse { id }))
}

async fn merge_files(
    State(state): State<AppState>,
    query: std::result::Result<Query<MergeQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or(Error::MissingField { field: "id" })?;

    let job = state.store.open_job(&id).await?;
    let plan = job.merge_plan().await?;
    let ordered_by_record = plan.from_record;

    let mut sources = Vec::with_capacity(plan.inputs.len());
    let mut unreadable = 0;
    for input in plan.inputs {
        match tokio::fs::read(job.path_of(&input.file_name)).await {
            Ok(data) => sources.push(MergeSource {
                label: input.label,
                data,
            }),
            Err(e) => {
                let error = if e.kind() == std::io::ErrorKind::NotFound {
                    Error::PdfNotFound {
                        path: input.file_name,
                    }
                } else {
                    Error::Io(e)
                };
                tracing::error!(job_id = %id, file = %input.label, error = %error, "skipping staged file");
                unreadable += 1;
            }
        }
    }

    let outcome =
        tokio::task::spawn_blocking(move || QpdfWrapper::merge_documents(&sources)).await??;

    for (label, error) in &outcome.skipped {
        tracing::error!(job_id = %id, file = %label, error = %error, "skipping input that failed to load");
    }

    let cleanup_failures = job.discard().await;
    if cleanup_failures > 0 {
        tracing::warn!(job_id = %id, cleanup_failures, "merge job not fully removed");
    }

    let info = MergeInfo {
        files_merged: outcome.merged.len(),
        files_skipped: outcome.skipped.len() + unreadable,
        total_pages: outcome.page_count,
    };
    tracing::info!(
        job_id = %id,
        files_merged = info.files_merged,
        files_skipped = info.files_skipped,
        total_pages = info.total_pages,
        ordered_by_record,
        "merge complete"
    );

    let info_header = serde_json::to_string(&info)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, attachment(MERGED_FILE_NAME)),
            (HeaderName::from_static(MERGE_INFO_HEADER), info_header),
        ],
        outcome.data,
    )
        .into_response())
}

async fn unlock_pdf(
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let form = read_single_file_form(multipart?).await?;
    let (name, data) = form.file.ok_or(Error::MissingField { field: "file" })?;
    let password = form
        .password
        .filter(|p| !p.is_empty())
        .ok_or(Error::MissingField { field: "password" })?;

    let unlocked =
        tokio::task::spawn_blocking(move || QpdfWrapper::unlock(&data, &password)).await??;

    tracing::info!(file = %name, bytes = unlocked.len(), "removed password protection");
    Ok(pdf_attachment(unlocked, &format!("unlocked-{}", name)))
}

async fn grayscale_pdf(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Response> {
    let form = read_single_file_form(multipart?).await?;
    let (name, data) = form.file.ok_or(Error::MissingField { field: "file" })?;

    let converter = Arc::clone(&state.grayscale);
    let output = tokio::task::spawn_blocking(move || converter.convert(&data)).await??;

    tracing::info!(file = %name, strategy = output.strategy, "converted to grayscale");
    Ok(pdf_attachment(output.data, &format!("grayscale-{}", name)))
}

// ============================================================================
// Helpers
// ============================================================================

async fn read_single_file_form(mut multipart: Multipart) -> Result<SingleFileForm> {
    let mut form = SingleFileForm::default();

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or(FALLBACK_FILE_NAME)
                    .to_owned();
                let data = field.bytes().await?;
                form.file = Some((file_name, data));
            }
            Some("password") => form.password = Some(field.text().await?),
            _ => {}
        }
    }

    Ok(form)
}

fn pdf_attachment(data: Vec<u8>, file_name: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, attachment(file_name)),
        ],
        data,
    )
        .into_response()
}

fn attachment(file_name: &str) -> String {
    format!("attachment; filename=\"{}\"", sanitize_file_name(file_name))
}

/// Reduce a client-supplied name to something safe inside a quoted header
/// parameter.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() || c == ' ') && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim().is_empty() {
        FALLBACK_FILE_NAME.to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Serve requests on an already bound listener until ctrl-c
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    state.store.ensure_root().await?;
    match state.store.job_ids().await {
        Ok(ids) if !ids.is_empty() => {
            tracing::warn!(
                leftover_jobs = ids.len(),
                staging_dir = %state.config.staging_dir.display(),
                "staging root holds jobs from an earlier run"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "cannot list staged jobs"),
    }

    tracing::info!(
        addr = ?listener.local_addr().ok(),
        staging_dir = %state.config.staging_dir.display(),
        grayscale_strategies = ?state.grayscale.strategy_names(),
        "PDF Toolkit ready"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            tracing::error!(error = %e, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

/// Run the server with the default configuration
pub async fn run_server() -> anyhow::Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    serve(listener, AppState::new(config)).await?;
    Ok(())
}
