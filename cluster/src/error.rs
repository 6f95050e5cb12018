use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Conflicting update: {0}")]
    Conflict(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Gave up updating {kind} {name} after {attempts} conflicting attempts")]
    RetriesExhausted {
        kind: &'static str,
        name: String,
        attempts: u32,
    },
    #[error("Invalid resource: {0}")]
    Invalid(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Kube(kube::Error),
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
                ClusterError::AlreadyExists(response.message)
            }
            kube::Error::Api(response) if response.code == 409 => ClusterError::Conflict(response.message),
            kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound(response.message),
            err => ClusterError::Kube(err),
        }
    }
}
