mod checksum;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use source_control::SourceControl;

use crate::api::{respond, AppState};

use checksum::VerifiedBody;
use domain::{Branch, RepositoryRef, Trigger, TriggerEvent};

const EVENT_HEADERS: [&str; 2] = ["x-github-event", "x-gitea-event"];

pub async fn handle_webhook<S>(
    State(state): State<AppState<S>>,
    headers: HeaderMap,
    body: String,
) -> Response
where
    S: SourceControl + Send + Sync + 'static,
{
    let body = match &state.webhook_secret {
        Some(secret) => match checksum::verify(&headers, body, secret) {
            Ok(body) => body,
            Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
        },
        None => VerifiedBody::unsigned(body),
    };

    match parse_trigger(&headers, &body) {
        Ok(Some(trigger)) => respond(state.triggers.handle(trigger).await),
        Ok(None) => (StatusCode::NO_CONTENT, "OK").into_response(),
        Err(message) => (StatusCode::BAD_REQUEST, message).into_response(),
    }
}

/// `None` for anything that should not start a pipeline: other events, tag
/// pushes and branch deletions.
fn parse_trigger(headers: &HeaderMap, body: &VerifiedBody) -> Result<Option<Trigger>, &'static str> {
    let event = EVENT_HEADERS.iter().find_map(|name| headers.get(*name));
    if let Some(event) = event {
        let event = event.to_str().map_err(|_| "Failed to parse event")?;
        if event != "push" {
            return Ok(None);
        }
    }

    let payload = serde_json::from_str::<PushEventData>(body.as_str()).map_err(|_| "Failed to parse payload")?;

    Ok(payload.extract_trigger())
}

#[derive(Deserialize)]
struct PushEventData {
    r#ref: String,
    after: String,
    repository: Repository,
    #[serde(default)]
    pusher: Pusher,
}

impl PushEventData {
    fn extract_trigger(self) -> Option<Trigger> {
        let branch = self.r#ref.strip_prefix("refs/heads/")?;
        if self.after.is_empty() || self.after.chars().all(|c| c == '0') {
            return None;
        }

        Some(Trigger {
            repository: RepositoryRef {
                id: self.repository.id,
                owner: self.repository.owner.login,
                name: self.repository.name,
            },
            pusher_id: self.pusher.id,
            event: TriggerEvent::Push {
                branch: Branch {
                    name: branch.to_owned(),
                    commit: self.after,
                },
            },
        })
    }
}

#[derive(Deserialize)]
struct Repository {
    id: i64,
    name: String,
    owner: RepositoryOwner,
}

#[derive(Deserialize)]
struct RepositoryOwner {
    login: String,
}

#[derive(Deserialize, Default)]
struct Pusher {
    #[serde(default)]
    id: i64,
}
