use diesel::{connection::SimpleConnection, prelude::*};

use crate::{
    repositories::RepositoryError,
    schema::{pipelines, stage_results, CREATE_TABLES},
    Branch, NewPipeline, NewStageResult, Pipeline, PipelineId, RunStatus, Stage, StageKind,
    StageResult, TriggerEvent,
};

pub struct PipelinesRepository {
    connection: SqliteConnection,
}

impl PipelinesRepository {
    pub fn create(database_url: &str) -> Result<Self, RepositoryError> {
        let mut connection = SqliteConnection::establish(database_url)?;
        connection.batch_execute(CREATE_TABLES)?;

        Ok(Self { connection })
    }
}

impl super::PipelinesRepository for PipelinesRepository {
    fn create_or_get(&mut self, pipeline: NewPipeline) -> Result<Pipeline, RepositoryError> {
        let configuration = serde_json::to_string(&pipeline.configuration).map_err(|source| {
            RepositoryError::Encode {
                field: "configuration",
                source,
            }
        })?;
        let branch = pipeline.event.branch();

        let row = NewPipelineRow {
            repository_id: pipeline.repository_id,
            repository_owner: pipeline.repository_owner.clone(),
            repository_name: pipeline.repository_name.clone(),
            pusher_id: pipeline.pusher_id,
            trigger_event: pipeline.event.name().to_owned(),
            ref_name: branch.name.clone(),
            commit_sha: branch.commit.clone(),
            configuration,
            stage: Stage::NotStarted,
            status: RunStatus::NotStarted,
            success: false,
            created_at: chrono::Utc::now().timestamp(),
        };

        let raw = self.connection.transaction::<_, diesel::result::Error, _>(|connection| {
            let existing = pipelines::table
                .filter(pipelines::repository_id.eq(row.repository_id))
                .filter(pipelines::commit_sha.eq(&row.commit_sha))
                .select(RawPipeline::as_select())
                .first(connection)
                .optional()?;

            match existing {
                Some(existing) => Ok(existing),
                None => diesel::insert_into(pipelines::table)
                    .values(&row)
                    .returning(RawPipeline::as_returning())
                    .get_result(connection),
            }
        })?;

        raw.into_pipeline()
    }

    fn find_by_commit(&mut self, repository_id: i64, commit: &str) -> Result<Option<Pipeline>, RepositoryError> {
        pipelines::table
            .filter(pipelines::repository_id.eq(repository_id))
            .filter(pipelines::commit_sha.eq(commit))
            .select(RawPipeline::as_select())
            .first(&mut self.connection)
            .optional()?
            .map(RawPipeline::into_pipeline)
            .transpose()
    }

    fn get(&mut self, id: PipelineId) -> Result<Option<Pipeline>, RepositoryError> {
        pipelines::table
            .filter(pipelines::id.eq(id))
            .select(RawPipeline::as_select())
            .first(&mut self.connection)
            .optional()?
            .map(RawPipeline::into_pipeline)
            .transpose()
    }

    fn list_not_started(
        &mut self,
        repository_id: Option<i64>,
    ) -> Result<Vec<Pipeline>, RepositoryError> {
        let mut query = pipelines::table
            .filter(pipelines::status.eq(RunStatus::NotStarted))
            .into_boxed();

        if let Some(repository_id) = repository_id {
            query = query.filter(pipelines::repository_id.eq(repository_id));
        }

        query
            .order(pipelines::id.asc())
            .select(RawPipeline::as_select())
            .load(&mut self.connection)?
            .into_iter()
            .map(RawPipeline::into_pipeline)
            .collect()
    }

    fn claim(&mut self, id: PipelineId, begin_at: i64) -> Result<bool, RepositoryError> {
        let updated = diesel::update(
            pipelines::table
                .filter(pipelines::id.eq(id))
                .filter(pipelines::status.eq(RunStatus::NotStarted)),
        )
        .set((
            pipelines::status.eq(RunStatus::Running),
            pipelines::begin_at.eq(Some(begin_at)),
        ))
        .execute(&mut self.connection)?;

        Ok(updated == 1)
    }

    fn advance_stage(&mut self, id: PipelineId, stage: Stage) -> Result<bool, RepositoryError> {
        let updated = diesel::update(
            pipelines::table
                .filter(pipelines::id.eq(id))
                .filter(pipelines::stage.le(stage)),
        )
        .set(pipelines::stage.eq(stage))
        .execute(&mut self.connection)?;

        Ok(updated == 1)
    }

    fn finish(
        &mut self,
        id: PipelineId,
        success: bool,
        error: Option<&str>,
        end_at: i64,
    ) -> Result<bool, RepositoryError> {
        let updated = diesel::update(
            pipelines::table
                .filter(pipelines::id.eq(id))
                .filter(pipelines::status.ne(RunStatus::Finished)),
        )
        .set((
            pipelines::status.eq(RunStatus::Finished),
            pipelines::success.eq(success),
            pipelines::error.eq(error),
            pipelines::end_at.eq(Some(end_at)),
        ))
        .execute(&mut self.connection)?;

        Ok(updated == 1)
    }

    fn insert_stage_result(
        &mut self,
        result: NewStageResult,
    ) -> Result<StageResult, RepositoryError> {
        let error = result
            .error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| RepositoryError::Encode {
                field: "error",
                source,
            })?;
        let payload = result
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| RepositoryError::Encode {
                field: "payload",
                source,
            })?;

        let row = NewStageResultRow {
            pipeline_id: result.pipeline_id,
            kind: result.kind,
            task_index: result.task_index,
            name: result.name,
            log: result.log,
            error,
            success: result.success,
            begin_at: result.begin_at,
            end_at: result.end_at,
            payload,
        };

        diesel::insert_into(stage_results::table)
            .values(&row)
            .returning(RawStageResult::as_returning())
            .get_result(&mut self.connection)?
            .into_stage_result()
    }

    fn list_stage_results(&mut self, id: PipelineId) -> Result<Vec<StageResult>, RepositoryError> {
        stage_results::table
            .filter(stage_results::pipeline_id.eq(id))
            .order(stage_results::id.asc())
            .select(RawStageResult::as_select())
            .load(&mut self.connection)?
            .into_iter()
            .map(RawStageResult::into_stage_result)
            .collect()
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::pipelines)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct RawPipeline {
    id: PipelineId,
    repository_id: i64,
    repository_owner: String,
    repository_name: String,
    pusher_id: i64,
    trigger_event: String,
    ref_name: String,
    commit_sha: String,
    configuration: String,
    stage: Stage,
    status: RunStatus,
    success: bool,
    error: Option<String>,
    begin_at: Option<i64>,
    end_at: Option<i64>,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::pipelines)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct NewPipelineRow {
    repository_id: i64,
    repository_owner: String,
    repository_name: String,
    pusher_id: i64,
    trigger_event: String,
    ref_name: String,
    commit_sha: String,
    configuration: String,
    stage: Stage,
    status: RunStatus,
    success: bool,
    created_at: i64,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = crate::schema::stage_results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct RawStageResult {
    id: i32,
    pipeline_id: PipelineId,
    kind: StageKind,
    task_index: i32,
    name: String,
    log: String,
    error: Option<String>,
    success: bool,
    begin_at: i64,
    end_at: i64,
    payload: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = crate::schema::stage_results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct NewStageResultRow {
    pipeline_id: PipelineId,
    kind: StageKind,
    task_index: i32,
    name: String,
    log: String,
    error: Option<String>,
    success: bool,
    begin_at: i64,
    end_at: i64,
    payload: Option<String>,
}

impl RawPipeline {
    fn into_pipeline(self) -> Result<Pipeline, RepositoryError> {
        let id = self.id.0;
        let corrupt = |message: String| RepositoryError::Corrupt { id, message };

        let configuration = serde_json::from_str(&self.configuration)
            .map_err(|err| corrupt(format!("configuration: {err}")))?;
        let branch = Branch {
            name: self.ref_name,
            commit: self.commit_sha,
        };
        let event = TriggerEvent::from_parts(&self.trigger_event, branch)
            .ok_or_else(|| corrupt(format!("unknown trigger event {}", self.trigger_event)))?;

        Ok(Pipeline {
            id: self.id,
            repository_id: self.repository_id,
            repository_owner: self.repository_owner,
            repository_name: self.repository_name,
            pusher_id: self.pusher_id,
            event,
            configuration,
            stage: self.stage,
            status: self.status,
            success: self.success,
            error: self.error,
            begin_at: self.begin_at,
            end_at: self.end_at,
            created_at: self.created_at,
        })
    }
}

impl RawStageResult {
    fn into_stage_result(self) -> Result<StageResult, RepositoryError> {
        let id = self.pipeline_id.0;
        let error = self
            .error
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| RepositoryError::Corrupt {
                id,
                message: format!("stage result {} error: {err}", self.id),
            })?;
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| RepositoryError::Corrupt {
                id,
                message: format!("stage result {} payload: {err}", self.id),
            })?;

        Ok(StageResult {
            id: self.id,
            pipeline_id: self.pipeline_id,
            kind: self.kind,
            task_index: self.task_index,
            name: self.name,
            log: self.log,
            error,
            success: self.success,
            begin_at: self.begin_at,
            end_at: self.end_at,
            payload,
        })
    }
}
