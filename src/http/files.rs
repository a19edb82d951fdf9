use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::extract::{parse_id, AuthUser};
use crate::attachments::{self, UploadRequest};
use crate::state::AppState;
use crate::{AppError, AppResult};

pub async fn upload(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((entity_type, id)): Path<(String, String)>,
    body: Result<Json<UploadRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id("id", &id)?;
    let Json(request) = body?;
    let meta = attachments::upload_command(
        &state.db,
        state.max_upload_bytes,
        &entity_type,
        user.id,
        id,
        &request,
    )
    .await?;
    state.stats.invalidate(user.id);
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "file": meta })),
    ))
}

pub async fn list(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((entity_type, id)): Path<(String, String)>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id("id", &id)?;
    let files = attachments::list_command(&state.db, &entity_type, user.id, id).await?;
    Ok(Json(json!({ "success": true, "files": files })))
}

pub async fn download(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((entity_type, id, file_id)): Path<(String, String, String)>,
) -> AppResult<Response> {
    let id = parse_id("id", &id)?;
    let file = attachments::download_command(&state.db, &entity_type, user.id, id, &file_id).await?;
    let content_type = HeaderValue::from_str(&file.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&content_disposition(&file.name))
        .map_err(|err| AppError::new("HTTP/HEADER", err.to_string()))?;
    Ok((
        [(CONTENT_TYPE, content_type), (CONTENT_DISPOSITION, disposition)],
        file.payload,
    )
        .into_response())
}

pub async fn delete(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((entity_type, id, file_id)): Path<(String, String, String)>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id("id", &id)?;
    attachments::delete_command(&state.db, &entity_type, user.id, id, &file_id).await?;
    state.stats.invalidate(user.id);
    Ok(Json(json!({
        "success": true,
        "message": "File deleted successfully",
    })))
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_escapes_unsafe_names() {
        assert_eq!(
            content_disposition("policy.pdf"),
            "attachment; filename=\"policy.pdf\"; filename*=UTF-8''policy.pdf"
        );
        let header = content_disposition("résumé \"v2\".pdf");
        assert!(header.starts_with("attachment; filename=\"r_sum_ _v2_.pdf\""));
        assert!(header.ends_with("filename*=UTF-8''r%C3%A9sum%C3%A9%20%22v2%22.pdf"));
        assert!(HeaderValue::from_str(&header).is_ok());
    }
}
