//! HTTP handlers for the drive: upload, list, download, share, delete, mode,
//! and the event stream the presentation layer listens on.

use crate::{
    errors::AppError,
    models::{file_record::DEFAULT_MIME_TYPE, storage_mode::StorageMode},
    services::{
        drive_service::{Download, DriveSnapshot},
        orchestrator::{SourceFile, UploadReport},
    },
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Redirect, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub struct SetModeReq {
    pub mode: String,
}

#[derive(Serialize)]
pub struct ModeResp {
    pub mode: StorageMode,
    pub label: &'static str,
}

#[derive(Serialize)]
pub struct ShareResp {
    pub url: String,
}

/// GET `/api/drive` — current session snapshot.
pub async fn snapshot(State(state): State<AppState>) -> Result<Json<DriveSnapshot>, AppError> {
    Ok(Json(state.drive.snapshot().await?))
}

/// POST `/api/files` — multipart upload; every `file` field is one file, in order.
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadReport>, AppError> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Failed to read multipart field: {}", e);
        AppError::bad_request("Invalid multipart data")
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| AppError::bad_request("File name missing"))?;
        let mime_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        let bytes = field.bytes().await.map_err(|e| {
            warn!("Failed to read file content: {}", e);
            AppError::bad_request("Failed to read file")
        })?;
        debug!(%name, size = bytes.len(), "received upload part");
        files.push(SourceFile::new(name, mime_type, bytes));
    }

    if files.is_empty() {
        return Err(AppError::bad_request("No file provided"));
    }

    Ok(Json(state.drive.upload(files).await?))
}

/// GET `/api/files/{id}` — local payload inline, otherwise a redirect to the cloud copy.
pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    match state.drive.download(&id).await? {
        Download::Inline {
            name,
            mime_type,
            bytes,
        } => {
            let length = bytes.len();
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = StatusCode::OK;
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(&mime_type)
                    .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE)),
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            if let Ok(value) = HeaderValue::from_str(&content_disposition(&name)) {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            Ok(response)
        }
        Download::Redirect { url, .. } => Ok(Redirect::temporary(&url).into_response()),
    }
}

/// GET `/api/files/{id}/share`
pub async fn share_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ShareResp>, AppError> {
    let url = state.drive.share(&id).await?;
    Ok(Json(ShareResp { url }))
}

/// DELETE `/api/files/{id}` — removes the record; the cloud copy stays.
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.drive.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT `/api/mode` — `{ "mode": "dual" | "local" | "cloud" }`
pub async fn set_mode(
    State(state): State<AppState>,
    Json(req): Json<SetModeReq>,
) -> Result<Json<ModeResp>, AppError> {
    let mode = req.mode.parse::<StorageMode>().map_err(AppError::bad_request)?;
    let mode = state.drive.set_mode(mode).await?;
    Ok(Json(ModeResp {
        mode,
        label: mode.description(),
    }))
}

/// GET `/api/drive/events` — server-sent drive events.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.drive.subscribe();
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), rx)),
                    Err(err) => warn!(error = %err, "could not encode drive event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn content_disposition(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", sanitized)
}
