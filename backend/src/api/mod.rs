mod pipelines;
mod state;
mod webhook;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use source_control::SourceControl;
use std::io;
use tokio::signal::{self, unix::SignalKind};
use tracing::{error, info};

use crate::trigger::{TriggerError, TriggerOutcome};

use pipelines::{get_pipeline, trigger_pipeline};
use webhook::handle_webhook;

pub use state::AppState;

pub struct Server {
    app: Router,
    listen_address: String,
}

impl Server {
    pub fn new<S>(listen_address: String, state: AppState<S>) -> Self
    where
        S: SourceControl + Send + Sync + 'static,
    {
        let app = Router::new()
            .route("/webhook", post(handle_webhook::<S>))
            .route("/api/pipelines", post(trigger_pipeline::<S>))
            .route("/api/pipelines/:id", get(get_pipeline::<S>))
            .with_state(state);

        Self { app, listen_address }
    }

    pub async fn start(self) -> Result<(), io::Error> {
        let listener = tokio::net::TcpListener::bind(&self.listen_address).await?;

        info!(address = %listener.local_addr()?, "listening");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    }
}

/// Maps a trigger result onto the HTTP response shared by the webhook and
/// the manual trigger.
pub(crate) fn respond(result: Result<TriggerOutcome, TriggerError>) -> Response {
    match result {
        Ok(TriggerOutcome::Created(pipeline)) => (StatusCode::CREATED, Json(pipeline)).into_response(),
        Ok(TriggerOutcome::Existing(pipeline)) => (StatusCode::OK, Json(pipeline)).into_response(),
        Ok(TriggerOutcome::NoConfiguration) => {
            (StatusCode::OK, Json(json!({ "skipped": "no_configuration" }))).into_response()
        }
        Ok(TriggerOutcome::NotMatched) => (StatusCode::OK, Json(json!({ "skipped": "not_matched" }))).into_response(),
        Err(err) => {
            let status = match &err {
                TriggerError::Repository { .. } | TriggerError::Revision(_) => StatusCode::NOT_FOUND,
                TriggerError::Parser(_) | TriggerError::InvalidConfiguration(_) => StatusCode::UNPROCESSABLE_ENTITY,
                TriggerError::Store(_) | TriggerError::Queue(_) => {
                    error!(error = %err, "could not create pipeline");
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (status, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");

        info!("Received SIGINT, shutting down");
    };

    let terminate = async {
        signal::unix::signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received SIGTERM, shutting down");
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {}
    }
}
