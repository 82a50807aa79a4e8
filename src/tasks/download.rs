use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;

use crate::pool::Abort;
use crate::task::{Resource, Task, TaskContext, TaskDefinition};
use crate::validate::{ensure_exists, line_count, line_count_matches_index};

static CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// Fetches `url` over HTTP into the destination. Validation checks the file
/// exists and, when declared, its line count against either a fixed `lines`
/// value or a remote `index` object.
pub struct Download {
    definition: TaskDefinition,
    resource: Option<Resource>,
}

impl Download {
    pub fn new(definition: TaskDefinition) -> Self {
        Self {
            definition,
            resource: None,
        }
    }
}

#[async_trait]
impl Task for Download {
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
        let url = self.definition.require_str("url")?.to_string();
        let destination = self.definition.destination()?.to_path_buf();
        let target = ctx.local_path(&destination);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let response = CLIENT
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request failed: {url}"))?;
        if !response.status().is_success() {
            bail!("unexpected status {} for {url}", response.status());
        }
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body: {url}"))?;
        tokio::fs::write(&target, &body)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;

        self.resource = Some(Resource::new(url, destination.to_string_lossy()));
        Ok(())
    }

    async fn validate(&mut self, ctx: &TaskContext, _abort: &Abort) -> Result<()> {
        let resource = self
            .resource
            .as_ref()
            .ok_or_else(|| anyhow!("task '{}' produced no resource", self.definition.name))?;
        let local = ctx.local_path(Path::new(&resource.destination));
        ensure_exists(&local)?;

        if let Some(expected) = self.definition.params.get("lines").and_then(|v| v.as_u64()) {
            let actual = line_count(&local)?;
            if actual as u64 != expected {
                bail!(
                    "{} has {actual} line(s), expected {expected}",
                    local.display()
                );
            }
        }

        if let Some(index_uri) = self.definition.param_str("index") {
            let storage = ctx
                .storage
                .as_ref()
                .ok_or_else(|| anyhow!("index validation requires a remote storage session"))?;
            line_count_matches_index(storage.as_ref(), index_uri, &local).await?;
        }

        Ok(())
    }
}
