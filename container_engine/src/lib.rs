use std::{
    future::Future,
    path::{Path, PathBuf},
};

use secrecy::SecretString;

pub mod docker;
pub mod error;
pub mod log;

pub use error::EngineError;
pub use log::{EngineOutput, LogCollector, StructuredError};

/// Builds, tags and pushes images, and runs short-lived task containers.
pub trait ContainerEngine {
    /// Builds `context` with `dockerfile` (relative to the context) and applies
    /// every tag in `tags`. A failing build is reported in the output, not as `Err`.
    fn build(
        &self,
        dockerfile: &str,
        context: &Path,
        tags: &[String],
    ) -> impl Future<Output = Result<EngineOutput, EngineError>> + Send;

    fn push(
        &self,
        tag: &str,
        credentials: &RegistryCredentials,
    ) -> impl Future<Output = Result<EngineOutput, EngineError>> + Send;

    fn run_task(
        &self,
        task: &TaskSpec,
    ) -> impl Future<Output = Result<TaskOutput, EngineError>> + Send;
}

#[derive(Clone, Debug)]
pub struct RegistryCredentials {
    pub server: String,
    pub username: String,
    pub password: SecretString,
}

/// A command list executed with `/bin/sh` inside `image`, with `workspace`
/// mounted at [`WORKSPACE_MOUNT`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub image: String,
    pub commands: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workspace: PathBuf,
    /// Directory inside the workspace the commands start in.
    pub scope: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskOutput {
    pub exit_code: i64,
    pub log: String,
}

pub const WORKSPACE_MOUNT: &str = "/workspace";

impl TaskOutput {
    pub fn is_ok(&self) -> bool {
        self.exit_code == 0
    }
}

impl TaskSpec {
    pub fn working_dir(&self) -> String {
        match self.scope.as_deref().map(|scope| scope.trim_matches('/')) {
            Some(scope) if !scope.is_empty() && scope != "." => format!("{WORKSPACE_MOUNT}/{scope}"),
            _ => WORKSPACE_MOUNT.to_owned(),
        }
    }

    pub fn script(&self) -> String {
        let mut script = String::from("set -e\n");
        for command in &self.commands {
            script.push_str(command);
            script.push('\n');
        }
        script
    }
}

/// Splits `host:port/repo/image:tag` into name and tag. `latest` when untagged.
pub fn split_tag(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((name, tag)) if !tag.contains('/') => (name, tag),
        _ => (reference, "latest"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_tag_should_respect_registry_port() {
        assert_eq!(
            split_tag("registry:5000/acme/web:3f2a1"),
            ("registry:5000/acme/web", "3f2a1")
        );
        assert_eq!(
            split_tag("registry:5000/acme/web"),
            ("registry:5000/acme/web", "latest")
        );
        assert_eq!(split_tag("alpine"), ("alpine", "latest"));
    }

    #[test]
    fn working_dir_should_join_scope() {
        let mut task = TaskSpec {
            name: "lint".to_owned(),
            image: "alpine".to_owned(),
            commands: vec![],
            env: vec![],
            workspace: PathBuf::from("/tmp/work"),
            scope: None,
        };
        assert_eq!(task.working_dir(), "/workspace");

        task.scope = Some("./".to_owned());
        assert_eq!(task.working_dir(), "/workspace");

        task.scope = Some("services/api/".to_owned());
        assert_eq!(task.working_dir(), "/workspace/services/api");
    }

    #[test]
    fn script_should_stop_on_first_failure() {
        let task = TaskSpec {
            name: "test".to_owned(),
            image: "alpine".to_owned(),
            commands: vec!["make lint".to_owned(), "make test".to_owned()],
            env: vec![],
            workspace: PathBuf::from("/tmp/work"),
            scope: None,
        };

        assert_eq!(task.script(), "set -e\nmake lint\nmake test\n");
    }
}
