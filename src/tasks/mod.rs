use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::pool::Abort;
use crate::registry::TaskRegistry;
use crate::task::{Resource, Task, TaskContext, TaskDefinition};
use crate::validate::ensure_work_dir;

pub mod download;

pub use download::Download;

pub fn register_defaults(registry: &mut TaskRegistry) {
    registry.register("hello_world", &["destination"], |def| {
        Ok(Box::new(HelloWorld::new(def)))
    });
    registry.register("download", &["destination", "url"], |def| {
        Ok(Box::new(Download::new(def)))
    });
    registry.register_pretask("check_work_dir", &[], |def| {
        Ok(Box::new(CheckWorkDir::new(def)))
    });
}

/// Demo task: writes a greeting to its destination. `who` defaults to
/// `world`.
pub struct HelloWorld {
    definition: TaskDefinition,
    resource: Option<Resource>,
}

impl HelloWorld {
    pub fn new(definition: TaskDefinition) -> Self {
        Self {
            definition,
            resource: None,
        }
    }
}

#[async_trait]
impl Task for HelloWorld {
    fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    fn definition_mut(&mut self) -> &mut TaskDefinition {
        &mut self.definition
    }

    fn resource(&self) -> Option<&Resource> {
        self.resource.as_ref()
    }

    async fn run(&mut self, ctx: &TaskContext, _abort: &Abort) -> Result<()> {
        let who = match self.definition.params.get("who") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "world".to_string(),
        };
        let destination = self.definition.destination()?.to_path_buf();
        let target = ctx.local_path(&destination);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, format!("Hello, {who}!"))
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        self.resource = Some(Resource::new(
            self.definition.name.clone(),
            destination.to_string_lossy(),
        ));
        Ok(())
    }
}

/// Pretask: the work dir must exist and be writable before anything runs.
pub struct CheckWorkDir {
    definition: TaskDefinition,
}

impl CheckWorkDir {
    pub fn new(definition: TaskDefinition) -> Self {
        Self { definition }
    }
}

#[async_trait]
impl Task for CheckWorkDir {
    fn definition(&self) -> &TaskDefinition {
        &self.definition
    }

    fn definition_mut(&mut self) -> &mut TaskDefinition {
        &mut self.definition
    }

    fn resource(&self) -> Option<&Resource> {
        None
    }

    async fn run(&mut self, ctx: &TaskContext, _abort: &Abort) -> Result<()> {
        ensure_work_dir(&ctx.work_dir)
    }
}
