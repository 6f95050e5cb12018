use std::{
    collections::BTreeMap,
    path::{Component, Path},
};

use serde::{Deserialize, Serialize};

use super::{docker_image_reference::DockerImageReference, trigger::TriggerRule};

/// Length of the commit prefix used as image tag when `meta.tag` is not set.
pub const COMMIT_TAG_LENGTH: usize = 5;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfiguration {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub meta: Meta,
    #[serde(default)]
    pub on: Vec<TriggerRule>,
    #[serde(default)]
    pub validation: Vec<TaskConfiguration>,
    #[serde(default)]
    pub build: Vec<BuildConfiguration>,
    #[serde(default)]
    pub test: Vec<TaskConfiguration>,
    pub push: Option<PushConfiguration>,
    pub deploy: Option<DeployConfiguration>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Meta {
    pub tag: Option<String>,
}

/// A task run in an isolated container: pre-build validation or post-build test.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfiguration {
    pub name: String,
    #[serde(rename = "type", alias = "lang")]
    pub kind: Option<String>,
    pub image: Option<DockerImageReference>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    pub scope: Option<String>,
    #[serde(default)]
    pub skip: bool,
    pub enable: Option<bool>,
    pub threshold: Option<u32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct BuildConfiguration {
    pub name: String,
    #[serde(rename = "type", default = "default_build_type")]
    pub kind: String,
    pub dockerfile: Option<String>,
    pub scope: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct PushConfiguration {
    pub on: Option<Vec<TriggerRule>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfiguration {
    pub on: Option<Vec<TriggerRule>>,
    pub replicas: Option<i32>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub stateful: bool,
    #[serde(default)]
    pub envs: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
}

fn default_build_type() -> String {
    "docker".to_owned()
}

impl PipelineConfiguration {
    /// Rejects documents that parse but cannot run. Called before any pipeline
    /// is created so configuration errors never reach the runner.
    pub fn validate(&self) -> Result<(), String> {
        for (index, task) in self.validation.iter().enumerate() {
            if task.image.is_none() {
                return Err(format!(
                    "validation task #{} \"{}\" has no image",
                    index + 1,
                    task.name
                ));
            }
            check_scope(task.scope.as_deref())?;
        }

        for task in &self.test {
            check_scope(task.scope.as_deref())?;
        }

        for build in &self.build {
            if build.kind != "docker" {
                return Err(format!(
                    "build task \"{}\" has unsupported type \"{}\"",
                    build.name, build.kind
                ));
            }
            check_scope(build.scope.as_deref())?;
            check_scope(build.dockerfile.as_deref())?;
        }

        if let Some(deploy) = &self.deploy {
            if deploy.ports.contains(&0) {
                return Err("deploy ports must be between 1 and 65535".to_owned());
            }
            if deploy.replicas.is_some_and(|replicas| replicas < 0) {
                return Err("deploy replicas must not be negative".to_owned());
            }
        }

        Ok(())
    }

    pub fn image_tag(&self, commit: &str) -> String {
        match self.meta.tag.as_deref().map(str::trim) {
            Some(tag) if !tag.is_empty() => tag.to_owned(),
            _ => commit.chars().take(COMMIT_TAG_LENGTH).collect(),
        }
    }
}

impl TaskConfiguration {
    pub fn is_enabled(&self) -> bool {
        self.enable.unwrap_or(true)
    }
}

impl BuildConfiguration {
    pub fn dockerfile(&self) -> &str {
        self.dockerfile.as_deref().unwrap_or("Dockerfile")
    }

    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(".")
    }
}

/// Paths in the configuration are relative to the repository root and may not
/// leave it.
fn check_scope(scope: Option<&str>) -> Result<(), String> {
    let Some(scope) = scope else {
        return Ok(());
    };

    let escapes = Path::new(scope)
        .components()
        .any(|component| matches!(component, Component::ParentDir | Component::RootDir | Component::Prefix(_)));

    if escapes {
        Err(format!("path \"{scope}\" must stay inside the repository"))
    } else {
        Ok(())
    }
}
