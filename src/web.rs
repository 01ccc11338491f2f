use crate::error::StoreError;
use crate::mailbox::{ImportFailure, ImportReport, Mailbox};
use crate::settings::Config;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Maps [`StoreError`] onto HTTP statuses with a JSON body.
#[derive(Debug)]
pub struct AppError(StoreError);

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::NotAnImage(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            StoreError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::StoreWrite(_) | StoreError::Render(_) | StoreError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;
type MailboxHandle = Extension<Arc<Mailbox>>;

#[derive(Debug, Serialize)]
struct ReadFlag {
    id: String,
    read: bool,
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    messages: Vec<ImportItem>,
}

#[derive(Debug, Deserialize)]
struct ImportItem {
    raw: Option<String>,
    base64: Option<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_folders(Extension(mailbox): MailboxHandle) -> impl IntoResponse {
    Json(mailbox.list_folders().await)
}

async fn list_messages(Extension(mailbox): MailboxHandle) -> impl IntoResponse {
    Json(mailbox.list_all().await)
}

async fn delete_all(Extension(mailbox): MailboxHandle) -> impl IntoResponse {
    let deleted = mailbox.delete_all().await;
    Json(json!({ "deleted": deleted }))
}

async fn message_detail(Extension(mailbox): MailboxHandle, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(mailbox.get_detail(&id).await?))
}

async fn delete_message(Extension(mailbox): MailboxHandle, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    mailbox.delete_one(&id).await?;
    Ok(Json(json!({ "deleted": id })))
}

async fn mark_read(Extension(mailbox): MailboxHandle, Path(id): Path<String>) -> ApiResult<Json<ReadFlag>> {
    let read = mailbox.mark_read(&id).await?;
    Ok(Json(ReadFlag { id, read }))
}

async fn mark_unread(Extension(mailbox): MailboxHandle, Path(id): Path<String>) -> ApiResult<Json<ReadFlag>> {
    let read = mailbox.mark_unread(&id).await?;
    Ok(Json(ReadFlag { id, read }))
}

async fn export_raw(Extension(mailbox): MailboxHandle, Path(id): Path<String>) -> ApiResult<Response> {
    let raw = mailbox.export_raw(&id).await?;
    let disposition = content_disposition(&format!("{}.eml", id));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("message/rfc822")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        raw,
    )
        .into_response())
}

async fn attachment(
    Extension(mailbox): MailboxHandle,
    Path((id, index)): Path<(String, usize)>,
) -> ApiResult<Response> {
    let attachment = mailbox.get_attachment(&id, index).await?;
    let content_type = HeaderValue::from_str(&attachment.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, content_disposition(&attachment.filename)),
        ],
        attachment.content,
    )
        .into_response())
}

async fn thumbnail(
    Extension(mailbox): MailboxHandle,
    Path((id, index)): Path<(String, usize)>,
) -> ApiResult<Response> {
    let png = mailbox.get_thumbnail(&id, index).await?;
    Ok(([(header::CONTENT_TYPE, HeaderValue::from_static("image/png"))], png).into_response())
}

async fn import(
    Extension(mailbox): MailboxHandle,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ImportReport>> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    let items: Vec<Result<Vec<u8>, String>> = if is_json {
        let request: ImportRequest = serde_json::from_slice(&body)
            .map_err(|e| StoreError::Parse(format!("invalid import request: {}", e)))?;
        request.messages.into_iter().map(decode_item).collect()
    } else {
        vec![Ok(body.to_vec())]
    };

    // Items that fail to decode are reported alongside store failures.
    let mut decoded = Vec::new();
    let mut undecodable = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        match item {
            Ok(bytes) => decoded.push((index, bytes)),
            Err(reason) => undecodable.push((index, reason)),
        }
    }
    let positions: Vec<usize> = decoded.iter().map(|(index, _)| *index).collect();
    let mut report = mailbox.import(decoded.into_iter().map(|(_, bytes)| bytes).collect()).await;
    for failure in &mut report.errors {
        failure.index = positions[failure.index];
    }
    for (index, error) in undecodable {
        report.failed += 1;
        report.errors.push(ImportFailure { index, error });
    }
    report.errors.sort_by_key(|failure| failure.index);

    info!("Import finished: {} imported, {} failed", report.imported, report.failed);
    Ok(Json(report))
}

fn decode_item(item: ImportItem) -> Result<Vec<u8>, String> {
    match (item.raw, item.base64) {
        (Some(raw), None) => Ok(raw.into_bytes()),
        (None, Some(encoded)) => BASE64
            .decode(encoded.trim())
            .map_err(|e| format!("invalid base64: {}", e)),
        _ => Err("expected exactly one of `raw` or `base64`".to_string()),
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 name.
fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' { c } else { '_' })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Body cap for imports: one message at the SMTP size limit, base64-encoded
/// inside a JSON envelope.
fn import_body_limit(max_message_size: usize) -> usize {
    max_message_size.saturating_mul(4) / 3 + 64 * 1024
}

pub fn create_router(mailbox: Arc<Mailbox>, max_message_size: usize) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/folders", get(list_folders))
        .route("/api/messages", get(list_messages).delete(delete_all))
        .route(
            "/api/messages/import",
            post(import).layer(DefaultBodyLimit::max(import_body_limit(max_message_size))),
        )
        .route("/api/messages/:id", get(message_detail).delete(delete_message))
        .route("/api/messages/:id/read", post(mark_read))
        .route("/api/messages/:id/unread", post(mark_unread))
        .route("/api/messages/:id/raw", get(export_raw))
        .route("/api/messages/:id/attachments/:index", get(attachment))
        .route("/api/messages/:id/attachments/:index/thumbnail", get(thumbnail))
        .layer(Extension(mailbox))
}

pub async fn start_web_server(config: &Config, mailbox: Arc<Mailbox>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind((config.bind_host.as_str(), config.http_port)).await?;
    info!("HTTP API running on http://{}:{}", config.bind_host, config.http_port);
    axum::serve(listener, create_router(mailbox, config.max_message_size)).await?;
    Ok(())
}
