use std::{fmt::Display, str::FromStr};

use diesel::{
    backend::Backend,
    deserialize::{self, FromSql, FromSqlRow},
    serialize::{self, IsNull, Output, ToSql},
    sql_types::{Integer, Text},
    sqlite::Sqlite,
    AsExpression,
};
use serde::{Deserialize, Serialize};

use super::{configuration::PipelineConfiguration, trigger::TriggerEvent};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, AsExpression, FromSqlRow)]
#[diesel(sql_type = Integer)]
pub struct PipelineId(pub i32);

/// One execution attempt for a (repository, commit).
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub id: PipelineId,
    pub repository_id: i64,
    pub repository_owner: String,
    pub repository_name: String,
    pub pusher_id: i64,
    pub event: TriggerEvent,
    pub configuration: PipelineConfiguration,
    pub stage: Stage,
    pub status: RunStatus,
    pub success: bool,
    pub error: Option<String>,
    pub begin_at: Option<i64>,
    pub end_at: Option<i64>,
    pub created_at: i64,
}

/// What a trigger hands to the store. Owner and name are kept on the row so the
/// runner can name images and cluster resources without a repository lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPipeline {
    pub repository_id: i64,
    pub repository_owner: String,
    pub repository_name: String,
    pub pusher_id: i64,
    pub event: TriggerEvent,
    pub configuration: PipelineConfiguration,
}

/// Progress markers in execution order. Persisted as the discriminant, so the
/// store can enforce that a pipeline never moves backwards.
#[repr(i32)]
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Integer)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NotStarted = 0,
    ValidateStart = 1,
    ValidateEnd = 2,
    BuildStart = 3,
    BuildEnd = 4,
    TestStart = 5,
    TestEnd = 6,
    PushStart = 7,
    PushEnd = 8,
    DeployStart = 9,
    DeployEnd = 10,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotStarted,
    Running,
    Finished,
}

impl Pipeline {
    pub fn commit(&self) -> &str {
        &self.event.branch().commit
    }

    pub fn ref_name(&self) -> &str {
        &self.event.branch().name
    }

    pub fn is_finished(&self) -> bool {
        self.status == RunStatus::Finished
    }
}

impl PipelineId {
    pub fn new(i: i32) -> Self {
        Self(i)
    }
}

impl Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ToSql<Integer, Sqlite> for PipelineId {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.0);
        Ok(IsNull::No)
    }
}

impl FromSql<Integer, Sqlite> for PipelineId {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        <i32 as FromSql<Integer, Sqlite>>::from_sql(bytes).map(PipelineId)
    }
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::NotStarted,
        Stage::ValidateStart,
        Stage::ValidateEnd,
        Stage::BuildStart,
        Stage::BuildEnd,
        Stage::TestStart,
        Stage::TestEnd,
        Stage::PushStart,
        Stage::PushEnd,
        Stage::DeployStart,
        Stage::DeployEnd,
    ];
}

impl TryFrom<i32> for Stage {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Stage::ALL
            .into_iter()
            .find(|stage| *stage as i32 == value)
            .ok_or_else(|| format!("Unknown pipeline stage {value}"))
    }
}

impl ToSql<Integer, Sqlite> for Stage {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(*self as i32);
        Ok(IsNull::No)
    }
}

impl FromSql<Integer, Sqlite> for Stage {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let value = <i32 as FromSql<Integer, Sqlite>>::from_sql(bytes)?;
        Ok(Stage::try_from(value)?)
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::NotStarted => "not_started",
            Stage::ValidateStart => "validate_start",
            Stage::ValidateEnd => "validate_end",
            Stage::BuildStart => "build_start",
            Stage::BuildEnd => "build_end",
            Stage::TestStart => "test_start",
            Stage::TestEnd => "test_end",
            Stage::PushStart => "push_start",
            Stage::PushEnd => "push_end",
            Stage::DeployStart => "deploy_start",
            Stage::DeployEnd => "deploy_end",
        };
        f.write_str(name)
    }
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Running => "running",
            RunStatus::Finished => "finished",
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "not_started" => Ok(RunStatus::NotStarted),
            "running" => Ok(RunStatus::Running),
            "finished" => Ok(RunStatus::Finished),
            _ => Err(format!("Could not parse pipeline status {value}")),
        }
    }
}

impl ToSql<Text, Sqlite> for RunStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(self.as_str());
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Sqlite> for RunStatus {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let value = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        Ok(value.parse::<RunStatus>()?)
    }
}
