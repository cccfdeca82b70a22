use thiserror::Error;

pub type Result<T> = std::result::Result<T, MaestroError>;

#[derive(Debug, Error)]
pub enum MaestroError {
    #[error("unknown movement `{0}` in piece")]
    UnknownMovement(String),
    #[error("movement `{0}` has no rules to route by")]
    NoRules(String),
    #[error("invalid rule condition `{0}`")]
    InvalidRule(String),
    #[error("no matching rule for movement `{movement}` (status {status})")]
    UnmatchedRule { movement: String, status: String },
    #[error("parallel group `{0}` cannot nest another parallel group")]
    NestedParallelGroup(String),
    #[error("provider call failed: {0}")]
    Provider(String),
    #[error("provider call interrupted")]
    Interrupted,
    #[error("session store error: {0}")]
    SessionStore(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
