use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;
use crate::storage::RemoteStorage;
use crate::task::{Resource, Status};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManifest {
    pub name: String,
    pub result: Status,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: Status::Pending,
            created: Utc::now(),
            staged: None,
            elapsed: None,
            log: Vec::new(),
            definition: None,
            extra: Map::new(),
        }
    }

    /// Forward-only transition. Terminal states stick; a lateral move to
    /// `Failed`/`Aborted` is always allowed from a non-terminal state.
    pub fn advance(&mut self, to: Status) {
        if !self.result.is_terminal() && to > self.result {
            self.result = to;
        }
    }

    pub fn mark_staged(&mut self) {
        self.advance(Status::Staged);
        let now = Utc::now();
        self.staged = Some(now);
        self.elapsed = Some((now - self.created).num_milliseconds() as f64 / 1_000.0);
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepManifest {
    pub name: String,
    pub result: Status,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<TaskManifest>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl StepManifest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: Status::Pending,
            created: Utc::now(),
            completed: None,
            elapsed: None,
            log: Vec::new(),
            tasks: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn recount(&mut self) {
        self.result = recount(self.tasks.iter().map(|t| t.result));
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootManifest {
    pub result: Status,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub log: Vec<String>,
    #[serde(default)]
    pub steps: BTreeMap<String, StepManifest>,
}

impl RootManifest {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            result: Status::Pending,
            created: now,
            modified: now,
            log: Vec::new(),
            steps: BTreeMap::new(),
        }
    }

    pub fn recount(&mut self) {
        self.result = recount(self.steps.values().map(|s| s.result));
    }
}

impl Default for RootManifest {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate result of a set of children. First matching priority wins:
/// FAILED > ABORTED > PENDING > STAGED > VALIDATED, else COMPLETED. An
/// empty set counts as COMPLETED.
pub fn recount(children: impl IntoIterator<Item = Status>) -> Status {
    let mut seen = [false; 6];
    for status in children {
        seen[status as usize] = true;
    }
    for status in [
        Status::Failed,
        Status::Aborted,
        Status::Pending,
        Status::Staged,
        Status::Validated,
    ] {
        if seen[status as usize] {
            return status;
        }
    }
    Status::Completed
}

/// Owns the root manifest and its persistence: pretty JSON under the work
/// dir, plus a revision-checked copy next to the remote prefix when one is
/// configured.
pub struct Manifest {
    root: RootManifest,
    path: PathBuf,
    remote_object: Option<String>,
}

impl Manifest {
    pub fn new(work_dir: &Path, remote_uri: Option<&str>) -> Self {
        Self {
            root: RootManifest::new(),
            path: work_dir.join(MANIFEST_FILE),
            remote_object: remote_uri
                .map(|prefix| format!("{}/{}", prefix.trim_end_matches('/'), MANIFEST_FILE)),
        }
    }

    pub fn root(&self) -> &RootManifest {
        &self.root
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn update_step(&mut self, step: StepManifest) {
        self.root.steps.insert(step.name.clone(), step);
        self.root.recount();
        self.root.modified = Utc::now();
    }

    /// Recounts the root, appends the run summary, writes the local JSON
    /// and pushes it remotely with compare-and-swap against the revision
    /// observed on download. Concurrent runs racing the same prefix fail
    /// fast on `PreconditionFailed`.
    pub async fn complete(
        &mut self,
        storage: Option<&dyn RemoteStorage>,
        settings_summary: &str,
    ) -> Result<Status> {
        let mut revision = 0;
        if let (Some(storage), Some(uri)) = (storage, self.remote_object.as_deref()) {
            match storage.download_to_string(uri).await {
                Ok((body, observed)) => {
                    let remote: RootManifest = serde_json::from_str(&body)
                        .with_context(|| format!("failed to parse remote manifest at {uri}"))?;
                    self.merge_remote(remote);
                    revision = observed;
                }
                Err(StorageError::NotFound(_)) => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to fetch manifest at {uri}"));
                }
            }
        }

        self.root.recount();
        self.root.modified = Utc::now();
        self.root.log.push(self.summary_line(settings_summary));

        let body = serde_json::to_string_pretty(&self.root)
            .context("failed to serialize manifest")?;
        fs::write(&self.path, body)
            .with_context(|| format!("failed to write manifest: {}", self.path.display()))?;

        if let (Some(storage), Some(uri)) = (storage, self.remote_object.as_deref()) {
            storage
                .upload(&self.path, uri, Some(revision))
                .await
                .with_context(|| format!("failed to upload manifest to {uri}"))?;
        }

        Ok(self.root.result)
    }

    // Remote steps from other runs survive; same-named steps are ours now.
    // The earliest created timestamp wins so the root reflects the first
    // run against this prefix.
    fn merge_remote(&mut self, remote: RootManifest) {
        for (name, step) in remote.steps {
            self.root.steps.entry(name).or_insert(step);
        }
        if remote.created < self.root.created {
            self.root.created = remote.created;
        }
        let mut log = remote.log;
        log.append(&mut self.root.log);
        self.root.log = log;
    }

    fn summary_line(&self, settings_summary: &str) -> String {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for step in self.root.steps.values() {
            for task in &step.tasks {
                *counts.entry(task.result.as_str()).or_default() += 1;
            }
        }
        let counts = counts
            .iter()
            .map(|(status, n)| format!("{status}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{} result={} settings[{}] counts[{}]",
            Utc::now().to_rfc3339(),
            self.root.result.as_str(),
            settings_summary,
            counts
        )
    }
}
