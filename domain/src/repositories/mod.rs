mod pipeline;

use std::sync::{Arc, Mutex};

use diesel::{result::Error as QueryError, ConnectionError};
use thiserror::Error;

use crate::PipelineId;

pub use pipeline::PipelinesRepository;

pub type SharedPipelinesRepository = Arc<Mutex<dyn PipelinesRepository + Send>>;

#[derive(Clone)]
pub struct Repositories {
    pub pipelines: SharedPipelinesRepository,
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Could not establish database connection: {0}")]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("Could not encode {field}: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Corrupt pipeline row {id}: {message}")]
    Corrupt { id: i32, message: String },
    #[error("Pipeline {0} not found")]
    NotFound(PipelineId),
    #[error("Pipeline repository lock was poisoned")]
    Poisoned,
}

impl Repositories {
    pub fn build(database_url: &str) -> Result<Repositories, RepositoryError> {
        let pipelines = pipeline::implementation::PipelinesRepository::create(database_url)?;
        let pipelines = Arc::new(Mutex::new(pipelines));

        Ok(Repositories { pipelines })
    }

    /// Runs `operation` with the pipelines store locked. Keep it synchronous so
    /// the lock is never held across an await point.
    pub fn with_pipelines<T>(
        &self,
        operation: impl FnOnce(&mut (dyn PipelinesRepository + Send)) -> Result<T, RepositoryError>,
    ) -> Result<T, RepositoryError> {
        let mut pipelines = self
            .pipelines
            .lock()
            .map_err(|_| RepositoryError::Poisoned)?;

        operation(&mut *pipelines)
    }
}
