use std::fs;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use pis::pool::Abort;
use pis::task::{Resource, Status, Task, TaskContext, TaskDefinition};
use pis::tasks;
use pis::{Step, TaskRegistry};
use tempfile::tempdir;

fn build_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    tasks::register_defaults(&mut registry);
    registry.register("boom", &[], |def| Ok(Box::new(Boom { definition: def })));
    registry.register_pretask("boom_pretask", &[], |def| {
        Ok(Box::new(Boom { definition: def }))
    });
    registry
}

fn definitions(yaml: &str) -> Vec<TaskDefinition> {
    serde_yaml::from_str(yaml).expect("test definitions")
}

struct Boom {
    definition: TaskDefinition,
}

#[async_trait]
impl Task for Boom {
    fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    fn definition_mut(&mut self) -> &mut TaskDefinition {
        &mut self.definition
    }

    fn resource(&self) -> Option<&Resource> {
        None
    }

    async fn run(&mut self, _ctx: &TaskContext, _abort: &Abort) -> Result<()> {
        bail!("boom");
    }
}

#[tokio::test]
async fn single_task_success_local() {
    let temp = tempdir().unwrap();
    let registry = build_registry();
    let ctx = Arc::new(TaskContext::local(temp.path()));

    let defs = definitions("- {name: hello_world, destination: out.txt, who: world}");
    let mut step = Step::new("demo", defs, ctx, 5);
    step.execute(&registry).await.unwrap();

    let content = fs::read_to_string(temp.path().join("out.txt")).unwrap();
    assert_eq!(content, "Hello, world!");

    let manifest = step.into_manifest();
    assert_eq!(manifest.result, Status::Validated);
    assert_eq!(manifest.tasks.len(), 1);
    assert_eq!(manifest.tasks[0].result, Status::Validated);
    assert!(manifest.tasks[0].staged.is_some());
    assert_eq!(manifest.resources.len(), 1);
    assert_eq!(
        manifest.resources[0].destination,
        temp.path().join("out.txt").to_string_lossy()
    );
}

#[tokio::test]
async fn failing_task_aborts_the_step() {
    let temp = tempdir().unwrap();
    let registry = build_registry();
    let ctx = Arc::new(TaskContext::local(temp.path()));

    let defs = definitions(
        "- {name: boom}\n- {name: hello_world, destination: ok.txt}",
    );
    let mut step = Step::new("demo", defs, ctx, 2);
    let err = step.execute(&registry).await.unwrap_err();
    assert!(err.to_string().contains("run"));

    let manifest = step.into_manifest();
    assert_eq!(manifest.result, Status::Failed);
    for task in &manifest.tasks {
        // The failure cascades: the survivor either staged before the abort
        // was observed or never started. Nothing stays pending.
        assert_ne!(task.result, Status::Pending);
        if task.name == "boom" {
            assert_eq!(task.result, Status::Failed);
        } else {
            assert!(matches!(task.result, Status::Staged | Status::Aborted));
        }
    }
}

#[tokio::test]
async fn scratchpad_expansion_feeds_task_parameters() {
    let temp = tempdir().unwrap();
    let registry = build_registry();
    let mut ctx = TaskContext::local(temp.path());
    ctx.scratchpad.store("target", "world");
    let ctx = Arc::new(ctx);

    let defs = definitions("- {name: hello_world, destination: out.txt, who: \"$target\"}");
    let mut step = Step::new("demo", defs, ctx, 5);
    step.execute(&registry).await.unwrap();

    let content = fs::read_to_string(temp.path().join("out.txt")).unwrap();
    assert_eq!(content, "Hello, world!");
}

#[tokio::test]
async fn unresolved_placeholder_fails_before_the_body() {
    let temp = tempdir().unwrap();
    let registry = build_registry();
    let ctx = Arc::new(TaskContext::local(temp.path()));

    let defs = definitions("- {name: hello_world, destination: out.txt, who: \"$missing\"}");
    let mut step = Step::new("demo", defs, ctx, 5);
    assert!(step.execute(&registry).await.is_err());

    assert!(!temp.path().join("out.txt").exists());
    let manifest = step.into_manifest();
    assert_eq!(manifest.tasks[0].result, Status::Failed);
}

#[tokio::test]
async fn pool_of_one_still_runs_every_task() {
    let temp = tempdir().unwrap();
    let registry = build_registry();
    let ctx = Arc::new(TaskContext::local(temp.path()));

    let defs = definitions(
        "- {name: hello_world a, destination: a.txt}\n\
         - {name: hello_world b, destination: b.txt}\n\
         - {name: hello_world c, destination: c.txt}",
    );
    let mut step = Step::new("demo", defs, ctx, 1);
    step.execute(&registry).await.unwrap();

    for file in ["a.txt", "b.txt", "c.txt"] {
        assert!(temp.path().join(file).is_file());
    }
    let manifest = step.into_manifest();
    assert_eq!(manifest.result, Status::Validated);
    assert_eq!(manifest.tasks.len(), 3);
    assert!(manifest.tasks.iter().all(|t| t.result == Status::Validated));
    assert_eq!(manifest.resources.len(), 3);
}

#[tokio::test]
async fn failing_pretask_stops_initialization() {
    let temp = tempdir().unwrap();
    let registry = build_registry();
    let ctx = Arc::new(TaskContext::local(temp.path()));

    let defs = definitions(
        "- {name: boom_pretask}\n- {name: hello_world, destination: out.txt}",
    );
    let mut step = Step::new("demo", defs, ctx, 5);
    let err = step.execute(&registry).await.unwrap_err();
    assert!(err.to_string().contains("initialization"));

    assert!(!temp.path().join("out.txt").exists());
    let manifest = step.into_manifest();
    assert_eq!(manifest.result, Status::Failed);
    assert!(manifest.tasks.iter().all(|t| t.result != Status::Pending));
}

#[tokio::test]
async fn check_work_dir_pretask_runs_before_tasks() {
    let temp = tempdir().unwrap();
    let registry = build_registry();
    let work_dir = temp.path().join("fresh");
    let ctx = Arc::new(TaskContext::local(&work_dir));

    let defs = definitions(
        "- {name: check_work_dir}\n- {name: hello_world, destination: out.txt}",
    );
    let mut step = Step::new("demo", defs, ctx, 5);
    step.execute(&registry).await.unwrap();

    assert!(work_dir.join("out.txt").is_file());
    let manifest = step.into_manifest();
    assert_eq!(manifest.tasks.len(), 2);
    assert_eq!(manifest.tasks[0].name, "check_work_dir");
    assert_eq!(manifest.tasks[0].result, Status::Completed);
    assert_eq!(manifest.result, Status::Validated);
}
