use serde_json::json;
use tracing::{debug, error, info};

use crate::error::TaskAborted;
use crate::manifest::TaskManifest;
use crate::pool::Abort;
use crate::task::{Phase, Status, Task, TaskContext};

/// A task paired with the manifest record it mutates. Instances move
/// through the pool by value; the step reassembles them afterwards.
pub struct TaskInstance {
    pub task: Box<dyn Task>,
    pub manifest: TaskManifest,
    pub pretask: bool,
}

impl std::fmt::Debug for TaskInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInstance")
            .field("manifest", &self.manifest)
            .field("pretask", &self.pretask)
            .finish_non_exhaustive()
    }
}

impl TaskInstance {
    pub fn new(task: Box<dyn Task>, manifest: TaskManifest) -> Self {
        Self {
            task,
            manifest,
            pretask: false,
        }
    }

    pub fn new_pretask(task: Box<dyn Task>, manifest: TaskManifest) -> Self {
        Self {
            task,
            manifest,
            pretask: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn status(&self) -> Status {
        self.manifest.result
    }
}

/// Phase wrapper. Exactly one outcome is recorded per call: the phase's
/// success status, `Failed` (which also sets the shared abort), or
/// `Aborted` when the signal was already up or the body asked for it.
pub async fn report(instance: &mut TaskInstance, phase: Phase, ctx: &TaskContext, abort: &Abort) {
    if instance.manifest.result.is_terminal() {
        return;
    }

    // Every log line carries the task name; concurrent workers interleave.
    let name = instance.manifest.name.clone();

    if abort.is_set() {
        instance.manifest.advance(Status::Aborted);
        instance
            .manifest
            .push_log(format!("{} aborted before start", phase.as_str()));
        info!(task = name.as_str(), phase = phase.as_str(), "task aborted");
        return;
    }

    if phase == Phase::Run {
        if let Err(err) = instance.task.definition_mut().expand(&ctx.scratchpad) {
            instance.manifest.advance(Status::Failed);
            instance.manifest.push_log(err.to_string());
            error!(task = name.as_str(), error = %err, "scratchpad expansion failed");
            abort.set();
            return;
        }
        instance.manifest.definition = Some(json!(instance.task.definition()));
    }

    debug!(task = name.as_str(), phase = phase.as_str(), "phase starting");
    let outcome = match phase {
        Phase::Run => instance.task.run(ctx, abort).await,
        Phase::Validate => instance.task.validate(ctx, abort).await,
        Phase::Upload => instance.task.upload(ctx, abort).await,
    };

    match outcome {
        Ok(()) => {
            match phase {
                Phase::Run => {
                    instance.manifest.mark_staged();
                    // A pretask's pipeline ends here; a successful run is
                    // its completion.
                    if instance.pretask {
                        instance.manifest.advance(Status::Completed);
                    }
                }
                _ => instance.manifest.advance(phase.on_success()),
            }
            instance
                .manifest
                .push_log(format!("{} {}", phase.as_str(), instance.manifest.result.as_str()));
            info!(
                task = name.as_str(),
                phase = phase.as_str(),
                result = instance.manifest.result.as_str(),
                "phase complete"
            );
        }
        Err(err) if err.is::<TaskAborted>() => {
            instance.manifest.advance(Status::Aborted);
            instance
                .manifest
                .push_log(format!("{} aborted", phase.as_str()));
            info!(task = name.as_str(), phase = phase.as_str(), "task aborted");
        }
        Err(err) => {
            instance.manifest.advance(Status::Failed);
            instance.manifest.push_log(format!("{}: {err:#}", phase.as_str()));
            error!(
                task = name.as_str(),
                phase = phase.as_str(),
                error = format!("{err:#}"),
                "phase failed"
            );
            abort.set();
        }
    }
}
