//! Properties of the document store and stage resolution

use pipeledger::fs::Document;
use pipeledger::models::{Coordinate, ModuleOrder, ProjectKind, StageId};
use pipeledger::pipeline::run_stage;
use pipeledger::StoreError;
use serde_json::json;
use tempfile::TempDir;

use super::helpers::{store, uploaded_project, Observe, Tag};

#[test]
fn test_never_written_coordinate_reads_default() {
    let temp = TempDir::new().unwrap();
    let project = store(&temp)
        .create(ProjectKind::Link, None, None, false)
        .unwrap();

    for stage in ModuleOrder::for_kind(ProjectKind::Link).stages() {
        let doc: Document = project
            .documents()
            .read(&Coordinate::stage(stage, "config.json").unwrap())
            .unwrap();
        assert!(doc.is_empty(), "{stage} should read as empty");
    }
}

#[test]
fn test_write_then_read_is_identity() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let coord = Coordinate::stage(StageId::RecodeTypes, "config.json").unwrap();
    let doc = json!({
        "types": {"a": "int", "b": "float"},
        "strict": false,
        "nested": [[1, 2], {"k": null}],
        "unicode": "école",
    });

    project.documents().write(&coord, &doc).unwrap();
    let back: serde_json::Value = project.documents().read(&coord).unwrap();
    assert_eq!(back, doc);
}

#[test]
fn test_before_stage_never_returns_same_or_later_rank() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let state = project.state();
    let order = *state.order();

    for stage in [StageId::ReplaceMvs, StageId::RecodeTypes, StageId::ConcatWithInit] {
        run_stage(state, &Tag(stage), "source.csv").unwrap();
    }

    for before in order.stages() {
        let limit = order.rank(before).unwrap();
        match state.last_written(None, Some("source.csv"), Some(before)) {
            Ok(loc) => assert!(order.rank(loc.stage).unwrap() < limit),
            Err(StoreError::NotFound(_)) => assert_eq!(before, StageId::Init),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

#[test]
fn test_unknown_file_is_not_found() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let err = project
        .state()
        .last_written(None, Some("other.csv"), None)
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn test_export_import_between_projects() {
    let temp = TempDir::new().unwrap();
    let source = uploaded_project(&temp);
    source
        .documents()
        .write(
            &Coordinate::stage(StageId::ReplaceMvs, "config.json").unwrap(),
            &json!({"thresh": 0.6}),
        )
        .unwrap();
    run_stage(source.state(), &Tag(StageId::ReplaceMvs), "source.csv").unwrap();

    let exported = source.read_full_config().unwrap();
    assert!(!exported.contains_key(&StageId::Init));
    assert_eq!(exported[&StageId::ReplaceMvs].len(), 1);

    let target = store(&temp)
        .create(ProjectKind::Normalize, None, None, false)
        .unwrap();
    target.upload_full_config(&exported).unwrap();
    let doc: Document = target
        .documents()
        .read(&Coordinate::stage(StageId::ReplaceMvs, "config.json").unwrap())
        .unwrap();
    assert_eq!(doc["thresh"], 0.6);
}

#[test]
fn test_deleted_project_cannot_be_opened() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let store = store(&temp);

    store.delete(ProjectKind::Normalize, project.id()).unwrap();
    let err = store.open(ProjectKind::Normalize, project.id()).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(store.list(ProjectKind::Normalize).unwrap().is_empty());
}

#[test]
fn test_stage_without_artifact_does_not_hide_upstream_data() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let state = project.state();

    let entry = run_stage(state, &Observe(StageId::ReplaceMvs), "source.csv").unwrap();
    assert!(entry.completed);
    assert_eq!(
        state.last_written(None, Some("source.csv"), None).unwrap().stage,
        StageId::Init
    );

    run_stage(state, &Tag(StageId::RecodeTypes), "source.csv").unwrap();
    let data = project
        .documents()
        .read_bytes(&Coordinate::stage(StageId::RecodeTypes, "source.csv").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(
        String::from_utf8(data).unwrap(),
        "a,b,c\n1,2,3\n4,5,6\n# recode_types\n"
    );
}
