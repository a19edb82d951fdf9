use anyhow::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use kinboard_lib::attachments::{
    delete_command, download_command, list_command, upload_command, UploadRequest,
};
use kinboard_lib::commands::{create_command, delete_command as delete_record};
use kinboard_lib::db::Db;
use kinboard_lib::ErrorKind;
use serde_json::json;

#[path = "util.rs"]
mod util;
use util::{fields, id_of, memory_db, owner};

const LIMIT: usize = 1024;

fn request(name: &str, mime: &str, bytes: &[u8]) -> UploadRequest {
    UploadRequest {
        name: name.to_string(),
        mime_type: mime.to_string(),
        size_bytes: Some(bytes.len() as i64),
        payload: STANDARD.encode(bytes),
    }
}

async fn attachment_count(db: &Db) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM attachments")
        .fetch_one(db.pool())
        .await?)
}

async fn policy(db: &Db, owner_id: i64) -> Result<i64> {
    let record = create_command(db, "policies", owner_id, &fields(json!({"name": "Health cover", "policy_name": "Health"}))).await?;
    Ok(id_of(&record))
}

#[tokio::test]
async fn upload_list_download_delete() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let id = policy(&db, me).await?;

    let body = b"premium schedule\n";
    let meta = upload_command(&db, LIMIT, "policies", me, id, &request("schedule.txt", "text/plain", body)).await?;
    assert_eq!(meta.entity_type, "policies");
    assert_eq!(meta.entity_id, id);
    assert_eq!(meta.size_bytes, body.len() as i64);

    let listed = list_command(&db, "policies", me, id).await?;
    assert_eq!(listed, vec![meta.clone()]);

    let file = download_command(&db, "policies", me, id, &meta.id).await?;
    assert_eq!(file.payload, body);
    assert_eq!(file.mime_type, "text/plain");
    assert_eq!(file.name, "schedule.txt");

    delete_command(&db, "policies", me, id, &meta.id).await?;
    assert!(list_command(&db, "policies", me, id).await?.is_empty());
    let err = download_command(&db, "policies", me, id, &meta.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn rejected_uploads_leave_nothing_behind() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let id = policy(&db, me).await?;

    let cases = [
        request("tool", "application/x-executable", b"\x7fELF"),
        request("big.txt", "text/plain", &[b'a'; LIMIT + 1]),
        request("disguised.pdf", "application/pdf", &[b"MZ".as_slice(), &[0u8; 64]].concat()),
        request("../escape.txt", "text/plain", b"x"),
    ];
    for case in &cases {
        let err = upload_command(&db, LIMIT, "policies", me, id, case).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "{} should be rejected", case.name);
    }

    let mut mismatch = request("a.txt", "text/plain", b"abc");
    mismatch.size_bytes = Some(10);
    assert!(upload_command(&db, LIMIT, "policies", me, id, &mismatch).await.is_err());

    assert_eq!(attachment_count(&db).await?, 0);
    Ok(())
}

#[tokio::test]
async fn attachments_follow_record_ownership() -> Result<()> {
    let db = memory_db().await;
    let me = owner(&db, "asha").await;
    let other = owner(&db, "ravi").await;
    let id = policy(&db, me).await?;
    let meta = upload_command(&db, LIMIT, "policies", me, id, &request("n.txt", "", b"note")).await?;
    assert_eq!(meta.mime_type, "text/plain");

    let err = upload_command(&db, LIMIT, "policies", other, id, &request("x.txt", "text/plain", b"x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(
        list_command(&db, "policies", other, id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        download_command(&db, "policies", other, id, &meta.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        delete_command(&db, "policies", other, id, &meta.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );

    delete_record(&db, "policies", me, id).await?;
    assert_eq!(attachment_count(&db).await?, 0);
    Ok(())
}
