use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClaimLensError {
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Run claim conflict: another worker owns this run")]
    RunClaimConflict,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
