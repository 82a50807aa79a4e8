use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::Semaphore;
use tracing::error;

use crate::reporter::{self, TaskInstance};
use crate::task::{Phase, TaskContext};

/// Set-once cancellation token shared by every worker. Observed at phase
/// boundaries only; in-flight phase bodies run to completion.
#[derive(Debug, Clone, Default)]
pub struct Abort(Arc<AtomicBool>);

impl Abort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded worker pool for one phase. Tasks flow through by value and come
/// back in arrival order, each carrying its mutated manifest.
pub struct XPool {
    size: usize,
}

impl XPool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub async fn xmap(
        &self,
        phase: Phase,
        instances: Vec<TaskInstance>,
        ctx: Arc<TaskContext>,
        abort: Abort,
    ) -> Vec<TaskInstance> {
        let semaphore = Arc::new(Semaphore::new(self.size));
        let mut workers = FuturesUnordered::new();

        for mut instance in instances {
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            let abort = abort.clone();
            workers.push(tokio::spawn(async move {
                // Held until the phase finishes.
                let _permit = semaphore.acquire_owned().await;
                reporter::report(&mut instance, phase, &ctx, &abort).await;
                instance
            }));
        }

        let mut done = Vec::with_capacity(workers.len());
        while let Some(joined) = workers.next().await {
            match joined {
                Ok(instance) => done.push(instance),
                Err(err) => {
                    abort.set();
                    error!(phase = phase.as_str(), error = %err, "worker panicked");
                }
            }
        }
        done
    }
}
