//! Entity store tests: upsert merge, key immutability, idempotent edges and
//! cascading deletes.

use fmtlib_db::test_fixtures::{record, TestDatabase};
use fmtlib_db::{Error, FormatRepository, TagRepository};
use serde_json::json;

async fn seed_bmp(test_db: &TestDatabase) {
    let db = &test_db.db;
    db.formats
        .upsert(
            record(json!({
                "uid": "fmt/114",
                "name": "Windows Bitmap",
                "version": "1.0",
                "source": "PRONOM",
                "mimetypes": ["image/bmp"],
                "extensions": ["bmp", "dib"]
            })),
            None,
        )
        .await
        .expect("upsert fmt/114");
    db.tags
        .upsert(
            record(json!({"tag": "BMP", "name": "Bitmap", "profile": "teneo"})),
            None,
        )
        .await
        .expect("upsert BMP");
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_upsert_merges_and_replaces_arrays() {
    let test_db = TestDatabase::new().await;
    seed_bmp(&test_db).await;
    let formats = &test_db.db.formats;

    let updated = formats
        .upsert(
            record(json!({"uid": "fmt/114", "extensions": ["bmp"], "version": "2.0"})),
            None,
        )
        .await
        .unwrap();

    assert_eq!(updated.name, "Windows Bitmap");
    assert_eq!(updated.version.as_deref(), Some("2.0"));
    assert_eq!(updated.extensions, vec!["bmp"]);
    assert_eq!(updated.mimetypes, vec!["image/bmp"]);

    let stored = formats.find("fmt/114").await.unwrap().unwrap();
    assert_eq!(stored, updated);
    assert_eq!(formats.count().await.unwrap(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_upsert_by_alternate_key() {
    let test_db = TestDatabase::new().await;
    seed_bmp(&test_db).await;
    let tags = &test_db.db.tags;

    let tag = tags
        .upsert(
            record(json!({"name": "Bitmap", "profile": "teneo", "info": {"note": "x"}})),
            Some(&["name", "profile"]),
        )
        .await
        .unwrap();
    assert_eq!(tag.tag, "BMP");
    assert_eq!(tag.info["note"], json!("x"));

    // Found by alternate key, so the primary key cannot change.
    let err = tags
        .upsert(
            record(json!({"tag": "BITMAP", "name": "Bitmap", "profile": "teneo"})),
            Some(&["name", "profile"]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let err = tags
        .upsert(record(json!({"name": "Nothing", "profile": "teneo"})), Some(&["name"]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("'tag'")));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_upsert_stores_empty_strings_as_given() {
    let test_db = TestDatabase::new().await;
    let db = &test_db.db;

    let format = db
        .formats
        .upsert(
            record(json!({"uid": "fmt/1", "name": "", "source": "PRONOM"})),
            None,
        )
        .await
        .unwrap();
    assert_eq!(format.name, "");
    assert_eq!(db.formats.find("fmt/1").await.unwrap(), Some(format));

    let tag = db
        .tags
        .upsert(
            record(json!({"tag": "X", "name": " ", "profile": "teneo"})),
            None,
        )
        .await
        .unwrap();
    assert_eq!(tag.name, " ");

    // Absent or null required fields still cannot create a row.
    let err = db
        .formats
        .upsert(record(json!({"uid": "fmt/2", "source": "PRONOM"})), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("'name'")));

    let err = db
        .tags
        .upsert(
            record(json!({"tag": "Y", "name": "Y", "profile": null})),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("'profile'")));
    assert_eq!(db.formats.count().await.unwrap(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_lookup_key_rejects_unknown_columns() {
    let test_db = TestDatabase::new().await;
    seed_bmp(&test_db).await;

    let err = test_db
        .db
        .formats
        .find_by(&record(json!({"uid = uid OR 1=1 --": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let found = test_db
        .db
        .formats
        .find_by(&record(json!({"source": "PRONOM", "version": "1.0"})))
        .await
        .unwrap();
    assert_eq!(found.map(|f| f.uid).as_deref(), Some("fmt/114"));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_edges_are_idempotent() {
    let test_db = TestDatabase::new().await;
    seed_bmp(&test_db).await;
    let tags = &test_db.db.tags;

    tags.add_format("BMP", "fmt/114").await.unwrap();
    tags.add_format("BMP", "fmt/114").await.unwrap();
    assert_eq!(tags.direct_formats("BMP").await.unwrap().len(), 1);

    tags.upsert(
        record(json!({"tag": "IMAGE", "name": "Images", "profile": "teneo"})),
        None,
    )
    .await
    .unwrap();
    tags.add_child("IMAGE", "BMP").await.unwrap();
    tags.add_child("IMAGE", "BMP").await.unwrap();
    assert_eq!(tags.child_tags("IMAGE").await.unwrap().len(), 1);
    assert_eq!(tags.parent_tags("BMP").await.unwrap()[0].tag, "IMAGE");

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_dangling_edge_is_constraint_error() {
    let test_db = TestDatabase::new().await;
    seed_bmp(&test_db).await;

    let err = test_db
        .db
        .tags
        .add_format("BMP", "fmt/999999")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Constraint(_)));
    assert!(err.is_data_error());

    let err = test_db
        .db
        .formats
        .upsert(
            record(json!({
                "uid": "fmt/115",
                "name": "Child",
                "source": "PRONOM",
                "parent_format": "fmt/404"
            })),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Constraint(_)));

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_delete_cascades_edges_and_child_formats() {
    let test_db = TestDatabase::new().await;
    seed_bmp(&test_db).await;
    let db = &test_db.db;

    db.formats
        .upsert(
            record(json!({
                "uid": "fmt/116",
                "name": "Windows Bitmap 3",
                "source": "PRONOM",
                "parent_format": "fmt/114",
                "related_formats": ["fmt/999999"]
            })),
            None,
        )
        .await
        .unwrap();
    db.tags.add_format("BMP", "fmt/114").await.unwrap();
    db.tags.add_format("BMP", "fmt/116").await.unwrap();

    assert!(db.formats.delete("fmt/114").await.unwrap());
    assert!(db.formats.find("fmt/116").await.unwrap().is_none());
    assert!(db.tags.direct_formats("BMP").await.unwrap().is_empty());

    assert!(db.tags.delete("BMP").await.unwrap());
    assert!(!db.tags.delete("BMP").await.unwrap());

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_concurrent_upserts_of_one_key() {
    let test_db = TestDatabase::new().await;
    let formats = test_db.db.formats.clone();

    let mut handles = Vec::new();
    for i in 0..8 {
        let formats = formats.clone();
        handles.push(tokio::spawn(async move {
            formats
                .upsert(
                    record(json!({
                        "uid": "fmt/1",
                        "name": format!("Broadcast WAVE {}", i),
                        "source": "PRONOM"
                    })),
                    None,
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(formats.count().await.unwrap(), 1);

    test_db.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_with_profile_and_list_by_source() {
    let test_db = TestDatabase::new().await;
    seed_bmp(&test_db).await;
    let db = &test_db.db;

    db.tags
        .upsert(
            record(json!({"tag": "HTML", "name": "HTML", "profile": "web"})),
            None,
        )
        .await
        .unwrap();

    let teneo = db.tags.with_profile(Some("teneo")).await.unwrap();
    assert_eq!(teneo.len(), 1);
    assert_eq!(teneo[0].tag, "BMP");
    assert_eq!(db.tags.with_profile(None).await.unwrap().len(), 2);

    assert_eq!(db.formats.list_by_source("PRONOM").await.unwrap().len(), 1);
    assert!(db.formats.list_by_source("LOC").await.unwrap().is_empty());

    test_db.cleanup().await;
}
