use std::{fmt::Display, str::FromStr};

use diesel::{
    backend::Backend,
    deserialize::{self, FromSql, FromSqlRow},
    serialize::{self, IsNull, Output, ToSql},
    sql_types::Text,
    sqlite::Sqlite,
    AsExpression,
};
use serde::{Deserialize, Serialize};

use super::pipeline::PipelineId;

/// The outcome of a single task. Insert-only: retries create a new pipeline.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StageResult {
    pub id: i32,
    pub pipeline_id: PipelineId,
    pub kind: StageKind,
    pub task_index: i32,
    pub name: String,
    pub log: String,
    pub error: Option<TaskError>,
    pub success: bool,
    pub begin_at: i64,
    pub end_at: i64,
    pub payload: Option<StagePayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStageResult {
    pub pipeline_id: PipelineId,
    pub kind: StageKind,
    pub task_index: i32,
    pub name: String,
    pub log: String,
    pub error: Option<TaskError>,
    pub success: bool,
    pub begin_at: i64,
    pub end_at: i64,
    pub payload: Option<StagePayload>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    PreBuild,
    Build,
    PostBuild,
    Push,
    Deploy,
}

/// Structured error as reported by the build tool, registry or cluster.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TaskError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StagePayload {
    Image {
        tag: String,
    },
    Deployment {
        ip: Option<String>,
        ports: Vec<PortMapping>,
    },
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub node_port: Option<i32>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }
}

impl Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::PreBuild => "pre_build",
            StageKind::Build => "build",
            StageKind::PostBuild => "post_build",
            StageKind::Push => "push",
            StageKind::Deploy => "deploy",
        }
    }
}

impl Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pre_build" => Ok(StageKind::PreBuild),
            "build" => Ok(StageKind::Build),
            "post_build" => Ok(StageKind::PostBuild),
            "push" => Ok(StageKind::Push),
            "deploy" => Ok(StageKind::Deploy),
            _ => Err(format!("Could not parse stage kind {value}")),
        }
    }
}

impl ToSql<Text, Sqlite> for StageKind {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Sqlite> for StageKind {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let value = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        Ok(value.parse::<StageKind>()?)
    }
}
