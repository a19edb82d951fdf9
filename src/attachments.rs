//! Files attached to a record.
//!
//! An attachment is addressed by `(entity_type, entity_id, id)` and is only
//! reachable through a record the caller owns.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use ts_rs::TS;

use crate::audit::{self, AuditAction};
use crate::db::Db;
use crate::files_validation::{reject_executable, resolve_mime, sanitize_filename};
use crate::id::new_uuid_v7;
use crate::op_log::LogScope;
use crate::schema::{get_schema, EntitySchema};
use crate::time::now_ms;
use crate::{AppError, AppResult};

pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;
pub const INVALID_PAYLOAD_CODE: &str = "ATTACHMENTS/INVALID_PAYLOAD";
pub const TOO_LARGE_CODE: &str = "ATTACHMENTS/TOO_LARGE";
pub const SIZE_MISMATCH_CODE: &str = "ATTACHMENTS/SIZE_MISMATCH";

const META_COLUMNS: &str = "id, entity_type, entity_id, name, mime_type, size_bytes, uploaded_at";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size_bytes: Option<i64>,
    /// Base64 body, optionally as a `data:` URL.
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct AttachmentMeta {
    pub id: String,
    pub entity_type: String,
    pub entity_id: i64,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub uploaded_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub name: String,
    pub mime_type: String,
    pub payload: Vec<u8>,
}

fn strip_data_url(payload: &str) -> &str {
    let trimmed = payload.trim();
    match trimmed.split_once(";base64,") {
        Some((head, body)) if head.starts_with("data:") => body,
        _ => trimmed,
    }
}

fn decode_payload(payload: &str, max_bytes: usize) -> AppResult<Vec<u8>> {
    let body = strip_data_url(payload);
    // Reject oversized uploads before allocating the decoded buffer.
    if body.len() / 4 * 3 > max_bytes + 3 {
        return Err(too_large(max_bytes));
    }
    STANDARD.decode(body).map_err(|err| {
        AppError::new(INVALID_PAYLOAD_CODE, "File payload is not valid base64")
            .with_context("error", err.to_string())
    })
}

fn too_large(max_bytes: usize) -> AppError {
    AppError::new(TOO_LARGE_CODE, "File exceeds the upload size limit")
        .with_context("max_bytes", max_bytes.to_string())
}

/// Run every upload check; nothing is written unless all of them pass.
pub fn validate_upload(req: &UploadRequest, max_bytes: usize) -> AppResult<(String, String, Vec<u8>)> {
    let name = sanitize_filename(&req.name)?;
    let mime_type = resolve_mime(&req.mime_type, &name)?;
    let bytes = decode_payload(&req.payload, max_bytes)?;
    if bytes.len() > max_bytes {
        return Err(too_large(max_bytes).with_context("size_bytes", bytes.len().to_string()));
    }
    if let Some(declared) = req.size_bytes {
        if declared != bytes.len() as i64 {
            return Err(AppError::new(
                SIZE_MISMATCH_CODE,
                "Declared size does not match the file payload",
            )
            .with_context("declared", declared.to_string())
            .with_context("actual", bytes.len().to_string()));
        }
    }
    reject_executable(&bytes)?;
    Ok((name, mime_type, bytes))
}

async fn ensure_record(db: &Db, schema: &EntitySchema, owner_id: i64, entity_id: i64) -> AppResult<()> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ? AND user_id = ?", schema.name);
    let found: Option<i64> = db
        .timed(async {
            Ok(sqlx::query_scalar::<_, i64>(&sql)
                .bind(entity_id)
                .bind(owner_id)
                .fetch_optional(db.pool())
                .await?)
        })
        .await?;
    found
        .map(|_| ())
        .ok_or_else(|| AppError::not_found("Record"))
}

fn audit_key(entity_type: &str, entity_id: i64, id: &str) -> String {
    format!("{entity_type}/{entity_id}/{id}")
}

async fn upload(
    db: &Db,
    max_bytes: usize,
    entity_type: &str,
    owner_id: i64,
    entity_id: i64,
    req: &UploadRequest,
) -> AppResult<AttachmentMeta> {
    let schema = get_schema(entity_type)?;
    ensure_record(db, schema, owner_id, entity_id).await?;
    let (name, mime_type, bytes) = validate_upload(req, max_bytes)?;

    let meta = AttachmentMeta {
        id: new_uuid_v7(),
        entity_type: schema.name.to_string(),
        entity_id,
        name,
        mime_type,
        size_bytes: bytes.len() as i64,
        uploaded_at: now_ms(),
    };
    db.timed(async {
        sqlx::query(
            "INSERT INTO attachments (entity_type, entity_id, id, user_id, name, mime_type, size_bytes, payload, uploaded_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&meta.entity_type)
        .bind(meta.entity_id)
        .bind(&meta.id)
        .bind(owner_id)
        .bind(&meta.name)
        .bind(&meta.mime_type)
        .bind(meta.size_bytes)
        .bind(&bytes)
        .bind(meta.uploaded_at)
        .execute(db.pool())
        .await?;
        Ok(())
    })
    .await?;

    audit::record(
        db,
        owner_id,
        AuditAction::Create,
        "attachments",
        &audit_key(schema.name, entity_id, &meta.id),
        Some(&json!({ "name": meta.name, "mimeType": meta.mime_type, "sizeBytes": meta.size_bytes })),
    )
    .await;
    Ok(meta)
}

async fn list(db: &Db, entity_type: &str, owner_id: i64, entity_id: i64) -> AppResult<Vec<AttachmentMeta>> {
    let schema = get_schema(entity_type)?;
    ensure_record(db, schema, owner_id, entity_id).await?;
    let sql = format!(
        "SELECT {META_COLUMNS} FROM attachments
         WHERE entity_type = ? AND entity_id = ? AND user_id = ?
         ORDER BY uploaded_at ASC, id ASC"
    );
    db.timed(async {
        Ok(sqlx::query_as::<_, AttachmentMeta>(&sql)
            .bind(schema.name)
            .bind(entity_id)
            .bind(owner_id)
            .fetch_all(db.pool())
            .await?)
    })
    .await
}

async fn download(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    entity_id: i64,
    attachment_id: &str,
) -> AppResult<Download> {
    let schema = get_schema(entity_type)?;
    let row = db
        .timed(async {
            Ok(sqlx::query_as::<_, (String, String, Vec<u8>)>(
                "SELECT name, mime_type, payload FROM attachments
                 WHERE entity_type = ? AND entity_id = ? AND id = ? AND user_id = ?",
            )
            .bind(schema.name)
            .bind(entity_id)
            .bind(attachment_id)
            .bind(owner_id)
            .fetch_optional(db.pool())
            .await?)
        })
        .await?;
    let (name, mime_type, payload) = row.ok_or_else(|| AppError::not_found("File"))?;
    Ok(Download {
        name,
        mime_type,
        payload,
    })
}

async fn delete(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    entity_id: i64,
    attachment_id: &str,
) -> AppResult<()> {
    let schema = get_schema(entity_type)?;
    let removed = db
        .timed(async {
            Ok(sqlx::query(
                "DELETE FROM attachments
                 WHERE entity_type = ? AND entity_id = ? AND id = ? AND user_id = ?",
            )
            .bind(schema.name)
            .bind(entity_id)
            .bind(attachment_id)
            .bind(owner_id)
            .execute(db.pool())
            .await?
            .rows_affected())
        })
        .await?;
    if removed == 0 {
        return Err(AppError::not_found("File"));
    }
    audit::record(
        db,
        owner_id,
        AuditAction::Delete,
        "attachments",
        &audit_key(schema.name, entity_id, attachment_id),
        None,
    )
    .await;
    Ok(())
}

/// Attachment metadata for many records of one type, keyed by record id.
pub async fn list_for_records(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    entity_ids: &[i64],
) -> AppResult<HashMap<i64, Vec<AttachmentMeta>>> {
    let mut grouped: HashMap<i64, Vec<AttachmentMeta>> = HashMap::new();
    if entity_ids.is_empty() {
        return Ok(grouped);
    }
    let placeholders = vec!["?"; entity_ids.len()].join(", ");
    let sql = format!(
        "SELECT {META_COLUMNS} FROM attachments
         WHERE entity_type = ? AND user_id = ? AND entity_id IN ({placeholders})
         ORDER BY uploaded_at ASC, id ASC"
    );
    let rows = db
        .timed(async {
            let mut query = sqlx::query_as::<_, AttachmentMeta>(&sql)
                .bind(entity_type)
                .bind(owner_id);
            for id in entity_ids {
                query = query.bind(*id);
            }
            Ok(query.fetch_all(db.pool()).await?)
        })
        .await?;
    for meta in rows {
        grouped.entry(meta.entity_id).or_default().push(meta);
    }
    Ok(grouped)
}

pub async fn upload_command(
    db: &Db,
    max_bytes: usize,
    entity_type: &str,
    owner_id: i64,
    entity_id: i64,
    req: &UploadRequest,
) -> AppResult<AttachmentMeta> {
    let scope = LogScope::new("attachments", "upload", entity_type, owner_id);
    let result = upload(db, max_bytes, entity_type, owner_id, entity_id, req)
        .await
        .map_err(|err| err.with_context("entity_id", entity_id.to_string()));
    scope.finish(result, |_| 1)
}

pub async fn list_command(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    entity_id: i64,
) -> AppResult<Vec<AttachmentMeta>> {
    let scope = LogScope::new("attachments", "list", entity_type, owner_id);
    let result = list(db, entity_type, owner_id, entity_id)
        .await
        .map_err(|err| err.with_context("entity_id", entity_id.to_string()));
    scope.finish(result, Vec::len)
}

pub async fn download_command(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    entity_id: i64,
    attachment_id: &str,
) -> AppResult<Download> {
    let scope = LogScope::new("attachments", "download", entity_type, owner_id);
    let result = download(db, entity_type, owner_id, entity_id, attachment_id)
        .await
        .map_err(|err| {
            err.with_context("entity_id", entity_id.to_string())
                .with_context("attachment_id", attachment_id.to_string())
        });
    scope.finish(result, |_| 1)
}

pub async fn delete_command(
    db: &Db,
    entity_type: &str,
    owner_id: i64,
    entity_id: i64,
    attachment_id: &str,
) -> AppResult<()> {
    let scope = LogScope::new("attachments", "delete", entity_type, owner_id);
    let result = delete(db, entity_type, owner_id, entity_id, attachment_id)
        .await
        .map_err(|err| {
            err.with_context("entity_id", entity_id.to_string())
                .with_context("attachment_id", attachment_id.to_string())
        });
    scope.finish(result, |_| 1)
}
