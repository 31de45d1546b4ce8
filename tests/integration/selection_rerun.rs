//! Selection growth invalidates downstream results, which a re-run restores

use pipeledger::models::{Coordinate, StageId};
use pipeledger::pipeline::{run_all, run_stage, StageBody};
use tempfile::TempDir;

use super::helpers::{columns, normalize_bodies, uploaded_project, Tag};

#[test]
fn test_selection_growth_then_rerun() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let state = project.state();

    project.add_selected_columns(&columns(&["a"])).unwrap();
    let bodies = normalize_bodies();
    let refs: Vec<&dyn StageBody> = bodies.iter().map(|b| b as &dyn StageBody).collect();
    let ended = run_all(state, "source.csv", &refs).unwrap();
    assert!(ended.iter().all(|e| e.completed));

    let before = state.last_written(None, Some("source.csv"), None).unwrap();
    assert_eq!(before.stage, StageId::ConcatWithInit);

    let stale = project.add_selected_columns(&columns(&["a", "b"])).unwrap();
    for stage in [StageId::ReplaceMvs, StageId::RecodeTypes, StageId::ConcatWithInit] {
        assert!(stale.contains(&Coordinate::stage(stage, "source.csv").unwrap()));
    }
    assert!(!stale.contains(&Coordinate::stage(StageId::Init, "source.csv").unwrap()));

    // Only the upload survives.
    let loc = state.last_written(None, Some("source.csv"), None).unwrap();
    assert_eq!(loc.stage, StageId::Init);

    let entry = run_stage(state, &Tag(StageId::ReplaceMvs), "source.csv").unwrap();
    assert!(entry.completed);

    let after = state.last_written(None, Some("source.csv"), None).unwrap();
    assert_eq!(after.stage, StageId::ReplaceMvs);
    assert!(after.ended_at > before.ended_at);

    let data = project
        .documents()
        .read_bytes(&Coordinate::stage(StageId::ReplaceMvs, "source.csv").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(
        String::from_utf8(data).unwrap(),
        "a,b,c\n1,2,3\n4,5,6\n# replace_mvs\n"
    );
}

#[test]
fn test_narrowing_selection_keeps_results() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let state = project.state();

    let bodies = normalize_bodies();
    let refs: Vec<&dyn StageBody> = bodies.iter().map(|b| b as &dyn StageBody).collect();
    run_all(state, "source.csv", &refs).unwrap();

    let stale = project.add_selected_columns(&columns(&["c", "a"])).unwrap();
    assert!(stale.is_empty());
    assert_eq!(project.selected_columns().unwrap(), columns(&["a", "c"]));

    let loc = state.last_written(None, Some("source.csv"), None).unwrap();
    assert_eq!(loc.stage, StageId::ConcatWithInit);
}

#[test]
fn test_run_info_follows_latest_run() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let state = project.state();

    project
        .documents()
        .write(
            &Coordinate::stage(StageId::ReplaceMvs, "config.json").unwrap(),
            &serde_json::json!({"thresh": 0.6}),
        )
        .unwrap();
    let first = run_stage(state, &Tag(StageId::ReplaceMvs), "source.csv").unwrap();
    let second = run_stage(state, &Tag(StageId::ReplaceMvs), "source.csv").unwrap();
    assert!(second.started_at >= first.started_at);

    let info = state
        .read_run_info(StageId::ReplaceMvs, "source.csv")
        .unwrap()
        .unwrap();
    assert_eq!(info.started_at, second.started_at);
    assert_eq!(info.params["thresh"], 0.6);
    assert_eq!(state.entries("source.csv").unwrap().len(), 5);
}
