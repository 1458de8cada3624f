use std::path::Path;

use anyhow::{Context, Result};
use axum::{
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tracing::{error, warn};

use crate::web::{models::WorkRow, responses};

/// Ensure the upload directory exists.
pub async fn ensure_storage_root(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("failed to ensure storage root at {}", path.display()))
}

/// Stream a stored work back to the client under its original filename.
pub async fn stream_work(upload_dir: &Path, work: &WorkRow) -> Response {
    let path = upload_dir.join(&work.stored_name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(work_id = work.id, file = %path.display(), "stored file is missing");
            return responses::not_found("作品文件不存在。");
        }
        Err(err) => {
            error!(?err, file = %path.display(), "failed to read stored file");
            return responses::server_error();
        }
    };

    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&work.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, content_type);

    match HeaderValue::from_str(&content_disposition(&work.original_name)) {
        Ok(value) => {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        Err(err) => {
            error!(?err, work_id = work.id, "invalid content disposition header");
            return responses::server_error();
        }
    }

    (headers, bytes).into_response()
}

/// Remove a stored work file; a missing file is not an error.
pub async fn remove_stored_file(upload_dir: &Path, stored_name: &str) {
    let path = upload_dir.join(stored_name);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(?err, file = %path.display(), "failed to remove stored file"),
    }
}

/// Attachment disposition with an ASCII fallback name plus the RFC 5987 UTF-8 form.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|ch| {
            if (ch.is_ascii_graphic() && ch != '"' && ch != '\\') || ch == ' ' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
