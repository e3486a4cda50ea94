use crate::k8s;

/// Errors that fail a reconcile and cause it to be retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Kube(#[from] k8s::Error),

    #[error("failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("object has no {0}")]
    MissingObjectKey(&'static str),

    /// An object owned by another reconciler does not exist yet. Its creation
    /// triggers another reconcile, so this is retried on a short delay.
    #[error("{0}")]
    ExpectedRace(String),

    #[error("invalid gateway parameters: {0}")]
    Params(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_expected_race(&self) -> bool {
        matches!(self, Self::ExpectedRace(_))
    }
}
