//! Checkpoint saver contract tests, run against the in-process saver through
//! `Arc<dyn CheckpointSaver>` the way the graph executor holds it.

mod init_logging;

use std::collections::HashMap;
use std::sync::Arc;

use heddle::{
    Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver, CheckpointSource,
    ListFilter, MemorySaver, PendingWrite,
};

fn saver() -> Arc<dyn CheckpointSaver> {
    Arc::new(MemorySaver::new())
}

fn checkpoint(id: &str, ts: i64) -> Checkpoint {
    let mut checkpoint = Checkpoint::new(id);
    checkpoint.timestamp = ts;
    checkpoint
        .channel_values
        .insert("messages".into(), serde_json::json!([id]));
    checkpoint
}

/// **Scenario**: Roundtrip through the trait object; absent timestamps
/// default to now-UTC nanoseconds.
#[tokio::test]
async fn roundtrip_and_timestamp_default() {
    let saver = saver();
    let config = CheckpointConfig::new("l1");

    let updated = saver
        .put(
            &config,
            Checkpoint::new("c1"),
            CheckpointMetadata::new(CheckpointSource::Input, -1),
            HashMap::from([("messages".into(), 1)]),
        )
        .await
        .unwrap();

    let found = saver.get(&updated).await.unwrap().unwrap();
    assert_eq!(found.id, "c1");
    assert!(found.timestamp > 0, "timestamp must be defaulted");
    assert_eq!(found.channel_versions.get("messages"), Some(&1));
}

/// **Scenario**: List windows with before + limit and filters on metadata.
#[tokio::test]
async fn list_windowing_and_metadata_filter() {
    let saver = saver();
    let config = CheckpointConfig::new("l1");

    for (id, ts, step) in [("c1", 100, 0), ("c2", 200, 1), ("c3", 300, 2)] {
        saver
            .put(
                &config,
                checkpoint(id, ts),
                CheckpointMetadata::new(CheckpointSource::Loop, step),
                HashMap::new(),
            )
            .await
            .unwrap();
    }

    let limited = saver
        .list(&config, Some(ListFilter::new().with_limit(2)))
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].checkpoint.id, "c3");
    assert_eq!(limited[1].checkpoint.id, "c2");

    let stepped = saver
        .list(
            &config,
            Some(ListFilter::new().with_metadata("step", serde_json::json!(1))),
        )
        .await
        .unwrap();
    assert_eq!(stepped.len(), 1);
    assert_eq!(stepped[0].checkpoint.id, "c2");

    let windowed = saver
        .list(
            &config,
            Some(
                ListFilter::new()
                    .with_before(config.clone().with_checkpoint_id("c3"))
                    .with_limit(1),
            ),
        )
        .await
        .unwrap();
    assert_eq!(windowed.len(), 1);
    assert_eq!(windowed[0].checkpoint.id, "c2");
}

/// **Scenario**: put_full stores checkpoint and writes atomically,
/// re-put of the same id replaces in place, delete_lineage removes all.
#[tokio::test]
async fn put_full_lifecycle() {
    let saver = saver();
    let config = CheckpointConfig::new("l1");

    let updated = saver
        .put_full(
            &config,
            checkpoint("c1", 1000),
            CheckpointMetadata::default(),
            vec![PendingWrite {
                task_id: "t1".into(),
                channel: "x".into(),
                value: serde_json::json!(42),
                ..PendingWrite::default()
            }],
        )
        .await
        .unwrap();

    let tuple = saver.get_tuple(&updated).await.unwrap().unwrap();
    assert_eq!(tuple.pending_writes.len(), 1);
    assert_eq!(tuple.pending_writes[0].task_id, "t1");
    assert_eq!(tuple.pending_writes[0].value, serde_json::json!(42));

    saver
        .put_full(
            &config,
            checkpoint("c1", 1000),
            CheckpointMetadata::default(),
            vec![PendingWrite {
                task_id: "t2".into(),
                channel: "y".into(),
                value: serde_json::json!(7),
                ..PendingWrite::default()
            }],
        )
        .await
        .unwrap();
    let tuple = saver.get_tuple(&updated).await.unwrap().unwrap();
    assert_eq!(tuple.pending_writes.len(), 1);
    assert_eq!(tuple.pending_writes[0].task_id, "t2");

    saver.delete_lineage("l1").await.unwrap();
    assert!(saver.get_tuple(&config).await.unwrap().is_none());
    assert!(saver.list(&config, None).await.unwrap().is_empty());
}

/// **Scenario**: Pending writes materialize in sequence order and carry the
/// parent pointer in the tuple.
#[tokio::test]
async fn writes_order_and_parent_pointer() {
    let saver = saver();
    let config = CheckpointConfig::new("l1");

    saver
        .put(
            &config,
            checkpoint("root", 100),
            CheckpointMetadata::default(),
            HashMap::new(),
        )
        .await
        .unwrap();
    let mut child = checkpoint("child", 200);
    child.parent_id = Some("root".into());
    let updated = saver
        .put(&config, child, CheckpointMetadata::default(), HashMap::new())
        .await
        .unwrap();

    saver
        .put_writes(
            &updated,
            vec![
                PendingWrite {
                    channel: "b".into(),
                    value: serde_json::json!(2),
                    sequence: 5,
                    ..PendingWrite::default()
                },
                PendingWrite {
                    channel: "a".into(),
                    value: serde_json::json!(1),
                    sequence: 1,
                    ..PendingWrite::default()
                },
            ],
            "t1",
            "tools",
        )
        .await
        .unwrap();

    let tuple = saver.get_tuple(&updated).await.unwrap().unwrap();
    let channels: Vec<&str> = tuple
        .pending_writes
        .iter()
        .map(|w| w.channel.as_str())
        .collect();
    assert_eq!(channels, vec!["a", "b"]);
    assert!(tuple.pending_writes.iter().all(|w| w.task_path == "tools"));
    assert_eq!(
        tuple.parent_config.unwrap().checkpoint_id.as_deref(),
        Some("root")
    );
}
