#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "util.rs"]
mod util;

use anyhow::Result;
use proptest::prelude::*;
use serde_json::json;

use listing_desk_lib::{
    AppError, EditBuffer, FieldValue, FileCategory, Mutation, RecordId, ResourceKind,
};
use util::{init_buffer_subscriber, log_lines, upload, Call, FakeStore};

const IMAGES: FileCategory = FileCategory::Images;
const DOCUMENTS: FileCategory = FileCategory::Documents;

fn property_store() -> (FakeStore, RecordId) {
    FakeStore::with_record(
        ResourceKind::Properties,
        json!({
            "id": 1,
            "title": "Loft on the canal",
            "price": 250000,
            "images": ["a.jpg", "b.jpg", "c.jpg"],
            "documents": ["plan.pdf"],
            "owner_documents": []
        }),
    )
}

#[tokio::test]
async fn repeated_replacement_keeps_only_the_last_file() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;

    buffer.stage_replacement(IMAGES, 1, upload("first.jpg", "one"))?;
    buffer.stage_replacement(IMAGES, 1, upload("second.jpg", "two"))?;

    let payload = buffer.payload();
    let replacements = payload.files_named("replace_images_1");
    assert_eq!(replacements.len(), 1);
    assert_eq!(replacements[0].file_name(), "second.jpg");
    assert_eq!(payload.file_count(), 1);
    Ok(())
}

#[tokio::test]
async fn delete_shrinks_the_list_and_drops_its_replacement() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer.stage_replacement(IMAGES, 1, upload("for-b.jpg", "b"))?;
    buffer.stage_replacement(IMAGES, 2, upload("for-c.jpg", "c"))?;

    buffer.delete_persisted(IMAGES, 1).await?;

    assert_eq!(buffer.persisted(IMAGES), ["a.jpg", "c.jpg"]);
    let keys: Vec<usize> = buffer
        .changes()
        .replacements(IMAGES)
        .map(|by_position| by_position.keys().copied().collect())
        .unwrap_or_default();
    assert_eq!(keys, vec![1]);
    assert!(keys.iter().all(|key| *key < buffer.persisted(IMAGES).len()));
    assert_eq!(
        buffer.changes().replacement(IMAGES, 1).map(|f| f.file_name()),
        Some("for-c.jpg")
    );
    assert_eq!(
        store.calls().last(),
        Some(&Call::DeleteFile(id.clone(), IMAGES, 1))
    );
    Ok(())
}

#[tokio::test]
async fn replacement_follows_its_file_after_an_earlier_delete() -> Result<()> {
    let (store, id) = FakeStore::with_record(
        ResourceKind::Properties,
        json!({ "id": 5, "images": ["front.jpg", "garden.jpg"] }),
    );
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer.stage_replacement(IMAGES, 1, upload("garden-new.jpg", "g"))?;

    buffer.delete_persisted(IMAGES, 0).await?;

    assert_eq!(buffer.persisted(IMAGES), ["garden.jpg"]);
    assert_eq!(
        buffer.changes().replacement(IMAGES, 0).map(|f| f.file_name()),
        Some("garden-new.jpg")
    );
    assert!(buffer.changes().replacement(IMAGES, 1).is_none());

    let saved = buffer.save().await?;
    assert_eq!(saved.files(IMAGES).len(), 1);
    assert!(saved.files(IMAGES)[0].ends_with("garden-new.jpg"));
    Ok(())
}

#[tokio::test]
async fn removed_pending_file_is_never_sent() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer.stage_new_file(IMAGES, upload("keep.jpg", "keep"))?;
    buffer.stage_new_file(IMAGES, upload("drop.jpg", "drop"))?;

    let removed = buffer.remove_pending_new_file(IMAGES, 1)?;
    assert_eq!(removed.file_name(), "drop.jpg");

    buffer.save().await?;
    let payload = store.last_payload().expect("save sent a payload");
    let names: Vec<&str> = payload
        .files_named("images[]")
        .iter()
        .map(|file| file.file_name())
        .collect();
    assert_eq!(names, vec!["keep.jpg"]);
    Ok(())
}

#[tokio::test]
async fn failed_save_leaves_staged_work_untouched() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer.set_scalar("title", FieldValue::from("Canal loft"));
    buffer.stage_new_file(IMAGES, upload("new.jpg", "new"))?;
    buffer.stage_replacement(DOCUMENTS, 0, upload("plan-v2.pdf", "%PDF-1.4 v2"))?;

    let before_changes = buffer.changes().clone();
    let before_record = buffer.record().clone();
    store.fail_next(
        AppError::new("VALIDATION/REJECTED", "The server rejected the submitted data.")
            .with_context("field.title", "too short"),
    );

    let err = buffer.save().await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION/REJECTED");
    assert_eq!(err.field_errors(), vec![("title", "too short")]);
    assert_eq!(buffer.changes(), &before_changes);
    assert_eq!(buffer.record(), &before_record);
    assert!(buffer.is_dirty());

    let saved = buffer.save().await?;
    assert_eq!(saved.field("title"), Some(&FieldValue::from("Canal loft")));
    assert_eq!(saved.files(IMAGES).len(), 4);
    assert!(!buffer.is_dirty());
    Ok(())
}

#[tokio::test]
async fn loading_twice_yields_equal_buffers() -> Result<()> {
    let (store, id) = property_store();
    let first = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    let second = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    assert_eq!(first.record(), second.record());
    assert_eq!(first.changes(), second.changes());
    assert!(!first.is_dirty());
    Ok(())
}

#[tokio::test]
async fn failed_load_produces_no_buffer() {
    let store = FakeStore::new();
    let result = EditBuffer::load(&store, ResourceKind::Properties, &RecordId::new("404")).await;
    let err = result.err().expect("missing record");
    assert_eq!(err.code(), "HTTP/NOT_FOUND");
    assert_eq!(
        err.context().get("resource").map(String::as_str),
        Some("properties")
    );
}

#[tokio::test]
async fn failed_delete_changes_nothing() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer.stage_replacement(IMAGES, 2, upload("c2.jpg", "c2"))?;
    let before = buffer.changes().clone();

    store.fail_next(AppError::new("AUTH/FORBIDDEN", "You are not allowed to do that."));
    let err = buffer.delete_persisted(IMAGES, 0).await.unwrap_err();
    assert_eq!(err.code(), "AUTH/FORBIDDEN");
    assert_eq!(err.context().get("position").map(String::as_str), Some("0"));
    assert_eq!(buffer.persisted(IMAGES).len(), 3);
    assert_eq!(buffer.changes(), &before);
    Ok(())
}

#[tokio::test]
async fn delete_does_not_mark_the_buffer_dirty() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer
        .apply(Mutation::DeletePersisted {
            category: DOCUMENTS,
            position: 0,
        })
        .await?;
    assert!(!buffer.is_dirty());
    assert!(buffer.persisted(DOCUMENTS).is_empty());
    assert!(store.stored(ResourceKind::Properties, &id).files(DOCUMENTS).is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_out_of_range_never_reaches_the_server() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    let calls = store.calls().len();
    let err = buffer.delete_persisted(DOCUMENTS, 3).await.unwrap_err();
    assert_eq!(err.code(), "ATTACHMENTS/POSITION_OUT_OF_RANGE");
    assert_eq!(store.calls().len(), calls);
    Ok(())
}

#[tokio::test]
async fn document_cap_counts_persisted_and_pending() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer.stage_new_file(DOCUMENTS, upload("deed.pdf", "%PDF-1.4 deed"))?;
    let err = buffer
        .stage_new_file(DOCUMENTS, upload("extra.pdf", "%PDF-1.4 extra"))
        .unwrap_err();
    assert_eq!(err.code(), "ATTACHMENTS/LIMIT_REACHED");
    assert_eq!(err.context().get("limit").map(String::as_str), Some("2"));
    assert_eq!(buffer.pending(DOCUMENTS).len(), 1);
    Ok(())
}

#[tokio::test]
async fn blog_post_carries_a_single_cover_image() -> Result<()> {
    let (store, id) = FakeStore::with_record(
        ResourceKind::BlogPosts,
        json!({ "id": "b1", "title": "Spring market", "images": [] }),
    );
    let mut buffer = EditBuffer::load(&store, ResourceKind::BlogPosts, &id).await?;
    buffer.stage_new_file(IMAGES, upload("cover.png", "cover"))?;
    let err = buffer
        .stage_new_file(IMAGES, upload("second.png", "second"))
        .unwrap_err();
    assert_eq!(err.code(), "ATTACHMENTS/LIMIT_REACHED");

    let err = buffer
        .stage_new_file(DOCUMENTS, upload("x.pdf", "x"))
        .unwrap_err();
    assert_eq!(err.code(), "ATTACHMENTS/CATEGORY_UNSUPPORTED");
    Ok(())
}

#[tokio::test]
async fn draft_save_creates_the_record() -> Result<()> {
    let store = FakeStore::new();
    let mut buffer = EditBuffer::draft(&store, ResourceKind::Prospects);
    buffer.set_scalar("first_name", FieldValue::from("Amina"));
    buffer.set_scalar("email", FieldValue::from("amina@example.com"));

    let err = buffer.delete_persisted(IMAGES, 0).await.unwrap_err();
    assert_eq!(err.code(), "ATTACHMENTS/CATEGORY_UNSUPPORTED");

    let saved = buffer.save().await?.clone();
    let id = saved.id.clone().expect("server assigned an id");
    assert_eq!(saved.field("first_name"), Some(&FieldValue::from("Amina")));
    match store.calls().last() {
        Some(Call::Create(payload)) => {
            assert_eq!(payload.text_value("_method"), None);
            assert_eq!(payload.text_value("email"), Some("amina@example.com"));
        }
        other => panic!("expected a create call, got {other:?}"),
    }
    assert_eq!(buffer.record().id.as_ref(), Some(&id));
    Ok(())
}

#[tokio::test]
async fn update_payload_carries_merged_scalars_and_method_override() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer.set_scalar("price", FieldValue::from(240000_i64));
    buffer.set_scalar("featured", FieldValue::from(true));

    let payload = buffer.payload();
    assert_eq!(payload.text_value("_method"), Some("PUT"));
    assert_eq!(payload.text_value("title"), Some("Loft on the canal"));
    assert_eq!(payload.text_value("price"), Some("240000"));
    assert_eq!(payload.text_value("featured"), Some("1"));
    assert_eq!(payload.text_value("id"), None);
    assert_eq!(buffer.field("price").and_then(FieldValue::as_f64), Some(240000.0));
    assert_eq!(
        buffer.record().field("price").and_then(FieldValue::as_f64),
        Some(250000.0)
    );
    Ok(())
}

#[tokio::test]
async fn discard_reverts_to_the_server_view() -> Result<()> {
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer.set_scalar("title", FieldValue::from("Changed"));
    buffer.stage_new_file(IMAGES, upload("d.jpg", "d"))?;

    buffer.discard();

    assert!(!buffer.is_dirty());
    assert!(buffer.pending(IMAGES).is_empty());
    assert_eq!(buffer.field("title"), Some(&FieldValue::from("Loft on the canal")));
    Ok(())
}

#[tokio::test]
async fn save_logs_fingerprints_not_file_names() -> Result<()> {
    let (buffer_log, _guard) = init_buffer_subscriber();
    let (store, id) = property_store();
    let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await?;
    buffer.stage_new_file(IMAGES, upload("client-passport.jpg", "secret"))?;
    buffer.save().await?;

    let lines = log_lines(&buffer_log);
    let saved = lines
        .iter()
        .find(|line| line["fields"]["event"] == "record_saved")
        .expect("record_saved event");
    assert_eq!(saved["target"], "listing_desk");
    assert_eq!(saved["fields"]["resource"], "properties");
    assert_eq!(saved["fields"]["files"], 1);

    let staged = lines
        .iter()
        .find(|line| line["fields"]["event"] == "file_staged")
        .expect("file_staged event");
    assert!(staged["fields"]["fingerprint"].is_string());

    let raw = serde_json::to_string(&lines)?;
    assert!(!raw.contains("client-passport"));
    Ok(())
}

#[derive(Debug, Clone)]
enum Op {
    Replace(usize, u8),
    Delete(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..6, any::<u8>()).prop_map(|(at, tag)| Op::Replace(at, tag)),
        (0usize..6).prop_map(Op::Delete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replacements_track_their_files(initial in 1usize..6, ops in prop::collection::vec(op_strategy(), 0..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let files: Vec<String> = (0..initial).map(|i| format!("img-{i}.jpg")).collect();
            let (store, id) = FakeStore::with_record(
                ResourceKind::Properties,
                json!({ "id": 9, "images": files.clone() }),
            );
            let mut buffer = EditBuffer::load(&store, ResourceKind::Properties, &id).await.unwrap();
            // Each slot: the persisted file and the tag of its staged replacement.
            let mut model: Vec<(String, Option<String>)> =
                files.iter().cloned().map(|file| (file, None)).collect();

            for op in ops {
                match op {
                    Op::Replace(at, tag) => {
                        let name = format!("r-{tag}.jpg");
                        let result = buffer.stage_replacement(IMAGES, at, upload(&name, &name));
                        if at < model.len() {
                            prop_assert!(result.is_ok());
                            model[at].1 = Some(name);
                        } else {
                            prop_assert!(result.is_err());
                        }
                    }
                    Op::Delete(at) => {
                        let result = buffer.delete_persisted(IMAGES, at).await;
                        if at < model.len() {
                            prop_assert!(result.is_ok());
                            model.remove(at);
                        } else {
                            prop_assert!(result.is_err());
                        }
                    }
                }

                let persisted: Vec<String> = model.iter().map(|(file, _)| file.clone()).collect();
                prop_assert_eq!(buffer.persisted(IMAGES), persisted.as_slice());
                for (position, (_, tag)) in model.iter().enumerate() {
                    let staged = buffer
                        .changes()
                        .replacement(IMAGES, position)
                        .map(|file| file.file_name().to_string());
                    prop_assert_eq!(&staged, tag);
                }
                let out_of_range = buffer
                    .changes()
                    .replacements(IMAGES)
                    .map(|by_position| by_position.keys().any(|key| *key >= model.len()))
                    .unwrap_or(false);
                prop_assert!(!out_of_range);
            }

            let payload = buffer.payload();
            for (position, (_, tag)) in model.iter().enumerate() {
                let sent = payload.files_named(&IMAGES.replacement_key(position));
                prop_assert_eq!(sent.len(), usize::from(tag.is_some()));
            }
            Ok(())
        })?;
    }

    #[test]
    fn removing_pending_files_keeps_them_out_of_the_payload(
        staged in 1usize..6,
        removals in prop::collection::vec(0usize..6, 0..6),
    ) {
        let store = FakeStore::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let mut buffer = EditBuffer::draft(&store, ResourceKind::Properties);
            let mut model: Vec<String> = Vec::new();
            for i in 0..staged {
                let name = format!("p-{i}.jpg");
                buffer.stage_new_file(IMAGES, upload(&name, &name)).unwrap();
                model.push(name);
            }
            for index in removals {
                let result = buffer.remove_pending_new_file(IMAGES, index);
                if index < model.len() {
                    let removed = result.unwrap();
                    prop_assert_eq!(removed.file_name(), model.remove(index));
                } else {
                    prop_assert!(result.is_err());
                }
            }
            let payload = buffer.payload();
            let sent: Vec<String> = payload
                .files_named("images[]")
                .iter()
                .map(|file| file.file_name().to_string())
                .collect();
            prop_assert_eq!(sent, model);
            Ok(())
        })?;
    }
}
