use pis::manifest::{RootManifest, StepManifest, TaskManifest, recount};
use pis::task::{Resource, Status};

#[test]
fn recount_priority_order() {
    use Status::*;
    assert_eq!(recount([Completed, Failed, Validated]), Failed);
    assert_eq!(recount([Completed, Aborted, Validated]), Aborted);
    assert_eq!(recount([Completed, Pending, Validated]), Pending);
    assert_eq!(recount([Completed, Staged, Validated]), Staged);
    assert_eq!(recount([Completed, Validated]), Validated);
    assert_eq!(recount([Completed, Completed]), Completed);
}

#[test]
fn recount_completed_only_when_every_child_completed() {
    use Status::*;
    assert_eq!(recount([Completed, Completed, Completed]), Completed);
    for other in [Pending, Staged, Validated, Failed, Aborted] {
        assert_ne!(recount([Completed, other]), Completed);
    }
}

#[test]
fn recount_of_nothing_is_completed() {
    assert_eq!(recount(Vec::<Status>::new()), Status::Completed);
}

#[test]
fn failed_beats_aborted() {
    assert_eq!(recount([Status::Aborted, Status::Failed]), Status::Failed);
}

#[test]
fn status_never_regresses() {
    let mut manifest = TaskManifest::new("t");
    manifest.advance(Status::Validated);
    manifest.advance(Status::Staged);
    assert_eq!(manifest.result, Status::Validated);
    manifest.advance(Status::Completed);
    assert_eq!(manifest.result, Status::Completed);
}

#[test]
fn terminal_states_stick() {
    let mut manifest = TaskManifest::new("t");
    manifest.advance(Status::Failed);
    manifest.advance(Status::Completed);
    assert_eq!(manifest.result, Status::Failed);

    let mut manifest = TaskManifest::new("t");
    manifest.advance(Status::Aborted);
    manifest.advance(Status::Staged);
    assert_eq!(manifest.result, Status::Aborted);
}

#[test]
fn staged_bookkeeping_fills_elapsed() {
    let mut manifest = TaskManifest::new("t");
    manifest.mark_staged();
    assert_eq!(manifest.result, Status::Staged);
    assert!(manifest.staged.is_some());
    assert!(manifest.elapsed.unwrap() >= 0.0);
}

#[test]
fn result_serializes_lowercase() {
    assert_eq!(
        serde_json::to_string(&Status::Validated).unwrap(),
        "\"validated\""
    );
    assert_eq!(
        serde_json::from_str::<Status>("\"aborted\"").unwrap(),
        Status::Aborted
    );
}

#[test]
fn manifest_round_trips_through_json() {
    let mut task = TaskManifest::new("hello_world");
    task.mark_staged();
    task.advance(Status::Validated);
    task.push_log("run staged");
    task.definition = Some(serde_json::json!({"name": "hello_world"}));

    let mut step = StepManifest::new("demo");
    step.tasks.push(task);
    step.resources
        .push(Resource::new("hello_world", "/work/out.txt"));
    step.recount();

    let mut root = RootManifest::new();
    root.steps.insert(step.name.clone(), step);
    root.recount();
    root.log.push("summary".to_string());

    let serialized = serde_json::to_string_pretty(&root).unwrap();
    let parsed: RootManifest = serde_json::from_str(&serialized).unwrap();
    assert_eq!(
        serde_json::to_value(&parsed).unwrap(),
        serde_json::to_value(&root).unwrap()
    );
    assert_eq!(parsed.result, Status::Validated);
    assert_eq!(parsed.steps["demo"].tasks[0].result, Status::Validated);
}
