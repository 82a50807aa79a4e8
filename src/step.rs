use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::error::StepFailed;
use crate::manifest::StepManifest;
use crate::pool::{Abort, XPool};
use crate::registry::TaskRegistry;
use crate::reporter::{self, TaskInstance};
use crate::task::{Phase, Status, TaskContext, TaskDefinition};

/// A named collection of pretasks and tasks selected at startup. Pretasks
/// run sequentially and happen-before every task; tasks fan out through a
/// fresh pool per phase.
pub struct Step {
    name: String,
    pool_size: usize,
    ctx: Arc<TaskContext>,
    abort: Abort,
    definitions: Vec<TaskDefinition>,
    pretasks: Vec<TaskInstance>,
    tasks: Vec<TaskInstance>,
    manifest: StepManifest,
}

impl Step {
    pub fn new(
        name: impl Into<String>,
        definitions: Vec<TaskDefinition>,
        ctx: Arc<TaskContext>,
        pool_size: usize,
    ) -> Self {
        let name = name.into();
        Self {
            manifest: StepManifest::new(&name),
            name,
            pool_size,
            ctx,
            abort: Abort::new(),
            definitions,
            pretasks: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abort(&self) -> &Abort {
        &self.abort
    }

    /// Drives the full pipeline: pretasks, then run / validate / upload
    /// phases. The manifest accumulates per-task state even when the step
    /// fails partway.
    pub async fn execute(&mut self, registry: &TaskRegistry) -> Result<()> {
        let pretask_defs: Vec<_> = self
            .definitions
            .iter()
            .filter(|def| registry.is_pretask(&def.name))
            .cloned()
            .collect();
        for def in &pretask_defs {
            match registry.instantiate(def) {
                Ok(instance) => self.pretasks.push(instance),
                Err(err) => return self.fail_instantiation(err),
            }
        }

        if self.pretasks.is_empty() {
            info!(step = self.name.as_str(), "no pretasks to run");
        }
        for pretask in &mut self.pretasks {
            reporter::report(pretask, Phase::Run, &self.ctx, &self.abort).await;
        }
        if self.abort.is_set() {
            self.manifest.push_log("initialization failed".to_string());
            self.finish();
            return Err(StepFailed::during("initialization").into());
        }

        let task_defs: Vec<_> = self
            .definitions
            .iter()
            .filter(|def| !registry.is_pretask(&def.name))
            .cloned()
            .collect();
        for def in &task_defs {
            match registry.instantiate(def) {
                Ok(instance) => self.tasks.push(instance),
                Err(err) => return self.fail_instantiation(err),
            }
        }

        self.phase(Phase::Run).await?;
        self.phase(Phase::Validate).await?;
        if self.ctx.remote_uri.is_none() {
            self.collect_resources(Status::Validated);
        } else {
            self.phase(Phase::Upload).await?;
            self.collect_resources(Status::Completed);
        }

        self.finish();
        Ok(())
    }

    // A fresh pool per phase; instances flow through as data and come back
    // in arrival order.
    async fn phase(&mut self, phase: Phase) -> Result<()> {
        let pool = XPool::new(self.pool_size);
        let instances = std::mem::take(&mut self.tasks);
        self.tasks = pool
            .xmap(phase, instances, self.ctx.clone(), self.abort.clone())
            .await;
        if self.abort.is_set() {
            warn!(
                step = self.name.as_str(),
                phase = phase.as_str(),
                "step aborted"
            );
            self.manifest
                .push_log(format!("{} phase failed", phase.as_str()));
            match phase {
                Phase::Validate if self.ctx.remote_uri.is_none() => {
                    self.collect_resources(Status::Validated)
                }
                Phase::Upload => self.collect_resources(Status::Completed),
                _ => {}
            }
            self.finish();
            return Err(StepFailed::during(phase.as_str()).into());
        }
        self.manifest
            .push_log(format!("{} phase complete", phase.as_str()));
        Ok(())
    }

    fn fail_instantiation(&mut self, err: anyhow::Error) -> Result<()> {
        self.abort.set();
        for instance in self.pretasks.iter_mut().chain(self.tasks.iter_mut()) {
            if instance.manifest.result == Status::Pending {
                instance.manifest.advance(Status::Aborted);
                instance.manifest.push_log("aborted before start".to_string());
            }
        }
        self.manifest
            .push_log(format!("instantiation failed: {err:#}"));
        self.finish();
        self.manifest.result = Status::Failed;
        Err(err)
    }

    fn collect_resources(&mut self, reached: Status) {
        for instance in &self.tasks {
            if instance.status() == reached
                && let Some(resource) = instance.task.resource()
            {
                self.manifest.resources.push(
                    resource.absolute(&self.ctx.work_dir, self.ctx.remote_uri.as_deref()),
                );
            }
        }
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.manifest.completed = Some(now);
        self.manifest.elapsed =
            Some((now - self.manifest.created).num_milliseconds() as f64 / 1_000.0);
        self.manifest.tasks = self
            .pretasks
            .iter()
            .chain(self.tasks.iter())
            .map(|instance| instance.manifest.clone())
            .collect();
        self.manifest.recount();
    }

    pub fn into_manifest(self) -> StepManifest {
        self.manifest
    }
}

/// Convenience wiring used by the binary: local context from the settings'
/// work dir plus the configured remote.
pub fn build_context(
    work_dir: &Path,
    remote_uri: Option<&str>,
    storage: Option<Arc<dyn crate::storage::RemoteStorage>>,
    scratchpad: crate::scratchpad::Scratchpad,
) -> Arc<TaskContext> {
    Arc::new(TaskContext {
        work_dir: work_dir.to_path_buf(),
        remote_uri: remote_uri.map(str::to_string),
        storage,
        scratchpad,
    })
}
