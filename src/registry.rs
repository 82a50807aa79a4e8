use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use once_cell::sync::OnceCell;

use crate::manifest::TaskManifest;
use crate::reporter::TaskInstance;
use crate::task::{Task, TaskDefinition, real_name};
use crate::tasks;

type TaskConstructor = Arc<dyn Fn(TaskDefinition) -> Result<Box<dyn Task>> + Send + Sync>;

struct TaskEntry {
    constructor: TaskConstructor,
    required: &'static [&'static str],
    pretask: bool,
}

/// Maps real task names to their constructors. Built-in tasks register at
/// startup; the same entry can back any number of recipe entries through
/// name suffixes (`download foo`, `download bar`).
pub struct TaskRegistry {
    entries: BTreeMap<String, TaskEntry>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, required: &'static [&'static str], constructor: F)
    where
        F: Fn(TaskDefinition) -> Result<Box<dyn Task>> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            TaskEntry {
                constructor: Arc::new(constructor),
                required,
                pretask: false,
            },
        );
    }

    pub fn register_pretask<F>(
        &mut self,
        name: impl Into<String>,
        required: &'static [&'static str],
        constructor: F,
    ) where
        F: Fn(TaskDefinition) -> Result<Box<dyn Task>> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            TaskEntry {
                constructor: Arc::new(constructor),
                required,
                pretask: true,
            },
        );
    }

    pub fn known_tasks(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn pretasks(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.pretask)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_pretask(&self, name: &str) -> bool {
        self.entries
            .get(real_name(name))
            .map(|entry| entry.pretask)
            .unwrap_or(false)
    }

    /// Re-validates the definition against the entry's schema (failing
    /// closed on missing required fields), builds the task, and attaches a
    /// fresh manifest.
    pub fn instantiate(&self, def: &TaskDefinition) -> Result<TaskInstance> {
        let name = def.real_name();
        let entry = self.entries.get(name).ok_or_else(|| {
            anyhow!(
                "Unknown task '{}'. Available tasks: {}",
                name,
                self.known_tasks().join(", ")
            )
        })?;

        let missing: Vec<&str> = entry
            .required
            .iter()
            .copied()
            .filter(|field| match *field {
                "destination" => def.destination.is_none(),
                other => !def.params.contains_key(other),
            })
            .collect();
        if !missing.is_empty() {
            bail!(
                "task '{}' is missing required fields: {}",
                def.name,
                missing.join(", ")
            );
        }

        let task = (entry.constructor)(def.clone())?;
        let manifest = TaskManifest::new(&def.name);
        if entry.pretask {
            Ok(TaskInstance::new_pretask(task, manifest))
        } else {
            Ok(TaskInstance::new(task, manifest))
        }
    }
}

static REGISTRY: OnceCell<TaskRegistry> = OnceCell::new();

/// Builds the process-global registry with the built-in tasks. Idempotent;
/// initialized after settings.
pub fn register_tasks() -> &'static TaskRegistry {
    REGISTRY.get_or_init(|| {
        let mut registry = TaskRegistry::new();
        tasks::register_defaults(&mut registry);
        registry
    })
}
