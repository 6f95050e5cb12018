use crate::{NewPipeline, NewStageResult, Pipeline, PipelineId, Stage, StageResult};

use super::RepositoryError;

pub mod implementation;

/// The store the pipeline core needs. Implementations serialize updates per row;
/// callers share one instance behind a mutex.
pub trait PipelinesRepository {
    /// Returns the existing row for the same (repository, commit) if there is one.
    fn create_or_get(&mut self, pipeline: NewPipeline) -> Result<Pipeline, RepositoryError>;

    fn find_by_commit(&mut self, repository_id: i64, commit: &str) -> Result<Option<Pipeline>, RepositoryError>;

    fn get(&mut self, id: PipelineId) -> Result<Option<Pipeline>, RepositoryError>;

    /// Pipelines nobody has claimed yet, in creation order.
    fn list_not_started(
        &mut self,
        repository_id: Option<i64>,
    ) -> Result<Vec<Pipeline>, RepositoryError>;

    /// Moves a not-started pipeline to running. `false` if it was claimed already.
    fn claim(&mut self, id: PipelineId, begin_at: i64) -> Result<bool, RepositoryError>;

    /// Never lowers the stage. `false` if the stored stage is already further.
    fn advance_stage(&mut self, id: PipelineId, stage: Stage) -> Result<bool, RepositoryError>;

    fn finish(
        &mut self,
        id: PipelineId,
        success: bool,
        error: Option<&str>,
        end_at: i64,
    ) -> Result<bool, RepositoryError>;

    fn insert_stage_result(
        &mut self,
        result: NewStageResult,
    ) -> Result<StageResult, RepositoryError>;

    fn list_stage_results(&mut self, id: PipelineId) -> Result<Vec<StageResult>, RepositoryError>;
}
