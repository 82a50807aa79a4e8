use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ScratchpadError;
use crate::pool::Abort;
use crate::scratchpad::Scratchpad;
use crate::storage::RemoteStorage;
use crate::validate::ensure_exists;

/// One entry from the recipe's step list. Open record: anything beyond
/// `name` and `destination` lands in `params` for the task to interpret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// First whitespace-separated token of a task name. `"download foo"` and
/// `"download bar"` both resolve to the `download` task class.
pub fn real_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or("")
}

impl TaskDefinition {
    pub fn real_name(&self) -> &str {
        real_name(&self.name)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.param_str(key)
            .ok_or_else(|| anyhow!("task '{}' requires a string '{}' field", self.name, key))
    }

    pub fn destination(&self) -> Result<&Path> {
        self.destination
            .as_deref()
            .ok_or_else(|| anyhow!("task '{}' has no destination", self.name))
    }

    /// Replaces `$name` placeholders in every string-valued field through the
    /// scratchpad. Runs before `run`; an unresolved placeholder fails the
    /// task before its body executes.
    pub fn expand(&mut self, pad: &Scratchpad) -> Result<(), ScratchpadError> {
        let dest_text = self
            .destination
            .as_ref()
            .and_then(|dest| dest.to_str())
            .filter(|text| text.contains('$'))
            .map(str::to_string);
        if let Some(text) = dest_text {
            let replaced = pad.replace(&text)?;
            self.destination = Some(PathBuf::from(value_to_text(&replaced)));
        }
        for value in self.params.values_mut() {
            if let Value::String(text) = value
                && text.contains('$')
            {
                *value = pad.replace(text)?;
            }
        }
        Ok(())
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A produced artifact: where it came from and where it ends up. The
/// destination stays recipe-relative until `absolute` resolves it against
/// the work dir or the remote prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub source: String,
    pub destination: String,
}

impl Resource {
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn absolute(&self, work_dir: &Path, remote_uri: Option<&str>) -> Resource {
        let destination = match remote_uri {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), self.destination),
            None => work_dir.join(&self.destination).to_string_lossy().into_owned(),
        };
        Resource {
            source: self.source.clone(),
            destination,
        }
    }
}

/// Pipeline state of a task or aggregate. Advances monotonically along the
/// first four values; `Failed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Staged,
    Validated,
    Completed,
    Failed,
    Aborted,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Failed | Status::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Staged => "staged",
            Status::Validated => "validated",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Run,
    Validate,
    Upload,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Run => "run",
            Phase::Validate => "validate",
            Phase::Upload => "upload",
        }
    }

    pub fn on_success(self) -> Status {
        match self {
            Phase::Run => Status::Staged,
            Phase::Validate => Status::Validated,
            Phase::Upload => Status::Completed,
        }
    }
}

/// Shared read-only context handed to every phase. The storage session is
/// acquired once per step and reused by all workers; the scratchpad is a
/// frozen copy of the process-wide one.
#[derive(Clone)]
pub struct TaskContext {
    pub work_dir: PathBuf,
    pub remote_uri: Option<String>,
    pub storage: Option<Arc<dyn RemoteStorage>>,
    pub scratchpad: Scratchpad,
}

impl TaskContext {
    pub fn local(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            remote_uri: None,
            storage: None,
            scratchpad: Scratchpad::new(),
        }
    }

    pub fn local_path(&self, destination: &Path) -> PathBuf {
        self.work_dir.join(destination)
    }
}

#[async_trait]
pub trait Task: Send {
    fn definition(&self) -> &TaskDefinition;

    fn definition_mut(&mut self) -> &mut TaskDefinition;

    /// Set by `run` before it returns; pretasks never produce one.
    fn resource(&self) -> Option<&Resource>;

    async fn run(&mut self, ctx: &TaskContext, abort: &Abort) -> Result<()>;

    async fn validate(&mut self, ctx: &TaskContext, _abort: &Abort) -> Result<()> {
        let resource = self
            .resource()
            .ok_or_else(|| anyhow!("task '{}' produced no resource", self.definition().name))?;
        ensure_exists(&ctx.local_path(Path::new(&resource.destination)))
    }

    async fn upload(&mut self, ctx: &TaskContext, _abort: &Abort) -> Result<()> {
        let definition_name = self.definition().name.clone();
        let resource = self
            .resource()
            .ok_or_else(|| anyhow!("task '{definition_name}' produced no resource"))?;
        let storage = ctx
            .storage
            .as_ref()
            .ok_or_else(|| anyhow!("no remote storage configured for task '{definition_name}'"))?;
        let src = ctx.local_path(Path::new(&resource.destination));
        let target = resource
            .absolute(&ctx.work_dir, ctx.remote_uri.as_deref())
            .destination;
        storage
            .upload(&src, &target, None)
            .await
            .with_context(|| format!("failed to upload {} to {target}", src.display()))?;
        Ok(())
    }
}
