use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{Pipeline, PipelineId, StageResult};
use serde::Serialize;
use source_control::SourceControl;
use tracing::error;

use crate::{
    api::{respond, AppState},
    trigger::ManualTrigger,
};

#[derive(Serialize)]
struct PipelineView {
    #[serde(flatten)]
    pipeline: Pipeline,
    results: Vec<StageResult>,
}

pub async fn trigger_pipeline<S>(State(state): State<AppState<S>>, Json(request): Json<ManualTrigger>) -> Response
where
    S: SourceControl + Send + Sync + 'static,
{
    respond(state.triggers.manual(request).await)
}

pub async fn get_pipeline<S>(State(state): State<AppState<S>>, Path(id): Path<i32>) -> Response
where
    S: Send + Sync + 'static,
{
    let id = PipelineId::new(id);
    let view = state.repositories.with_pipelines(|pipelines| {
        let Some(pipeline) = pipelines.get(id)? else {
            return Ok(None);
        };
        let results = pipelines.list_stage_results(id)?;
        Ok(Some(PipelineView { pipeline, results }))
    });

    match view {
        Ok(Some(view)) => Json(view).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, format!("Pipeline {id} not found")).into_response(),
        Err(err) => {
            error!(pipeline_id = %id, error = %err, "could not load pipeline");
            (StatusCode::INTERNAL_SERVER_ERROR, "Could not load pipeline").into_response()
        }
    }
}
