use thiserror::Error;

/// Raised inside a phase body (or observed on entry) to leave the pipeline
/// without counting as a failure.
#[derive(Debug, Error)]
#[error("task aborted")]
pub struct TaskAborted;

#[derive(Debug, Error)]
#[error("step failed during {phase}")]
pub struct StepFailed {
    pub phase: String,
}

impl StepFailed {
    pub fn during(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
        }
    }
}

#[derive(Debug, Error)]
#[error("unresolved scratchpad placeholder '${placeholder}'")]
pub struct ScratchpadError {
    pub placeholder: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("precondition failed for {uri}: expected revision {expected}")]
    PreconditionFailed { uri: String, expected: i64 },
    #[error("storage helper error: {0}")]
    Helper(String),
}
