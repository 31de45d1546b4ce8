//! Contention between independent writers and bounded lock waits

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use pipeledger::fs::{Document, DocumentStore, LockMode, LockedResource, RetryPolicy};
use pipeledger::models::{Coordinate, StageId};
use pipeledger::StoreError;
use serde_json::json;
use tempfile::TempDir;

use super::helpers::uploaded_project;

#[test]
fn test_concurrent_writers_leave_one_whole_document() {
    let temp = TempDir::new().unwrap();
    let store = DocumentStore::new(
        temp.path(),
        RetryPolicy::new(200, Duration::from_millis(5)),
    );
    let coord = Coordinate::stage(StageId::ReplaceMvs, "config.json").unwrap();

    let writers = 8;
    let barrier = Arc::new(Barrier::new(writers));
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let store = store.clone();
            let coord = coord.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let payload: Vec<u32> = vec![i as u32; 500 + i * 100];
                barrier.wait();
                store
                    .write(&coord, &json!({"writer": i, "payload": payload}))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let doc: Document = store.read(&coord).unwrap();
    let writer = doc["writer"].as_u64().unwrap() as usize;
    let payload = doc["payload"].as_array().unwrap();
    assert_eq!(payload.len(), 500 + writer * 100);
    assert!(payload.iter().all(|v| v.as_u64() == Some(writer as u64)));
}

#[test]
fn test_held_lock_times_out_then_succeeds_after_release() {
    let temp = TempDir::new().unwrap();
    let store = DocumentStore::new(temp.path(), RetryPolicy::new(3, Duration::from_millis(10)));
    let coord = Coordinate::stage(StageId::RecodeTypes, "config.json").unwrap();
    store.write(&coord, &json!({"v": 1})).unwrap();

    let holder =
        LockedResource::acquire(&store.path_of(&coord), LockMode::Exclusive, store.policy())
            .unwrap();

    let err = store.write(&coord, &json!({"v": 2})).unwrap_err();
    assert!(matches!(err, StoreError::LockTimeout { attempts: 3, .. }));
    assert!(err.is_retryable());
    let err = store.read::<Document>(&coord).unwrap_err();
    assert_eq!(err.kind(), "lock_timeout");

    holder.release().unwrap();
    store.write(&coord, &json!({"v": 2})).unwrap();
    let doc: Document = store.read(&coord).unwrap();
    assert_eq!(doc["v"], 2);
}

#[test]
fn test_waiting_writer_gets_through_once_holder_releases() {
    let temp = TempDir::new().unwrap();
    let store = DocumentStore::new(
        temp.path(),
        RetryPolicy::new(100, Duration::from_millis(10)),
    );
    let coord = Coordinate::stage(StageId::ReplaceMvs, "config.json").unwrap();
    store.write(&coord, &json!({"v": 1})).unwrap();

    let holder =
        LockedResource::acquire(&store.path_of(&coord), LockMode::Exclusive, store.policy())
            .unwrap();
    let writer = {
        let store = store.clone();
        let coord = coord.clone();
        thread::spawn(move || store.write(&coord, &json!({"v": 2})))
    };
    thread::sleep(Duration::from_millis(50));
    drop(holder);

    writer.join().unwrap().unwrap();
    let doc: Document = store.read(&coord).unwrap();
    assert_eq!(doc["v"], 2);
}

#[test]
fn test_parallel_stages_on_different_files_keep_every_entry() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let state = pipeledger::pipeline::PipelineState::new(
        DocumentStore::new(
            project.dir(),
            RetryPolicy::new(500, Duration::from_millis(2)),
        ),
        *project.state().order(),
    );

    let files: Vec<String> = (0..6).map(|i| format!("part{i}.csv")).collect();
    let handles: Vec<_> = files
        .iter()
        .cloned()
        .map(|file| {
            let state = state.clone();
            thread::spawn(move || {
                let entry = state.begin_stage(StageId::ReplaceMvs, &file).unwrap();
                state.end_stage(entry, None).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Read-modify-write of the metadata never loses an update.
    for file in &files {
        let entry = state.entry(StageId::ReplaceMvs, file).unwrap().unwrap();
        assert!(entry.completed, "{file} lost its entry");
    }
    assert!(state.dangling().unwrap().is_empty());
}
