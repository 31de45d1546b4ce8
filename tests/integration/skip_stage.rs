//! Skipped stages are invisible to data resolution and full runs

use pipeledger::models::{Coordinate, StageId};
use pipeledger::pipeline::{run_all, run_stage, StageBody};
use tempfile::TempDir;

use super::helpers::{normalize_bodies, uploaded_project, Tag};

#[test]
fn test_skip_excludes_stage_from_last_written() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let state = project.state();

    run_stage(state, &Tag(StageId::ReplaceMvs), "source.csv").unwrap();
    run_stage(state, &Tag(StageId::RecodeTypes), "source.csv").unwrap();
    assert_eq!(
        state.last_written(None, Some("source.csv"), None).unwrap().stage,
        StageId::RecodeTypes
    );

    state
        .set_skip(StageId::RecodeTypes, "source.csv", true)
        .unwrap();
    assert_eq!(
        state.last_written(None, Some("source.csv"), None).unwrap().stage,
        StageId::ReplaceMvs
    );

    // Unskipping does not bring the old completion back.
    let entry = state
        .set_skip(StageId::RecodeTypes, "source.csv", false)
        .unwrap();
    assert!(!entry.skipped);
    assert!(!entry.completed);
    assert_eq!(
        state.last_written(None, Some("source.csv"), None).unwrap().stage,
        StageId::ReplaceMvs
    );
}

#[test]
fn test_full_run_reads_past_skipped_stage() {
    let temp = TempDir::new().unwrap();
    let project = uploaded_project(&temp);
    let state = project.state();
    state
        .set_skip(StageId::ReplaceMvs, "source.csv", true)
        .unwrap();

    let bodies = normalize_bodies();
    let refs: Vec<&dyn StageBody> = bodies.iter().map(|b| b as &dyn StageBody).collect();
    let ended = run_all(state, "source.csv", &refs).unwrap();
    let stages: Vec<StageId> = ended.iter().map(|e| e.stage).collect();
    assert_eq!(stages, vec![StageId::RecodeTypes, StageId::ConcatWithInit]);

    let data = project
        .documents()
        .read_bytes(&Coordinate::stage(StageId::ConcatWithInit, "source.csv").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(
        String::from_utf8(data).unwrap(),
        "a,b,c\n1,2,3\n4,5,6\n# recode_types\n# concat_with_init\n"
    );
}
