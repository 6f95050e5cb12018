use std::{path::PathBuf, time::Duration};

use secrecy::SecretString;

#[derive(Clone)]
pub struct AppConfig {
    pub listen_address: String,
    pub database_url: String,
    pub storage: StorageConfig,
    pub webhook_secret: Option<SecretString>,
    pub registry: RegistryConfig,
    pub pipelines: PipelineConfig,
    pub cluster: ClusterConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageConfig {
    pub repositories_root: PathBuf,
    pub work_root: PathBuf,
    pub cache_root: PathBuf,
}

#[derive(Clone)]
pub struct RegistryConfig {
    pub host: String,
    pub username: String,
    pub password: SecretString,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub timeout: Duration,
    pub queue_capacity: usize,
    /// `None` runs every scheduled pipeline at once.
    pub max_concurrent: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterMode {
    Kube,
    /// Reconciles against an in-memory cluster. Nothing leaves the process.
    DryRun,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterConfig {
    pub mode: ClusterMode,
    pub external_ips: Vec<String>,
    pub update_attempts: u32,
}

impl AppConfig {
    pub fn from_environment() -> Result<AppConfig, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<AppConfig, String> {
        let env = Env(&lookup);

        Ok(AppConfig {
            listen_address: env.or("LISTEN_ADDRESS", "0.0.0.0:42069"),
            database_url: env.or("DATABASE_URL", "pipelines.db"),
            storage: StorageConfig::from_env(&env),
            webhook_secret: env.optional("WEBHOOK_SECRET").map(SecretString::new),
            registry: RegistryConfig::from_env(&env)?,
            pipelines: PipelineConfig::from_env(&env)?,
            cluster: ClusterConfig::from_env(&env)?,
        })
    }
}

impl StorageConfig {
    fn from_env(env: &Env) -> StorageConfig {
        StorageConfig {
            repositories_root: env.or("REPOSITORIES_ROOT", "repositories").into(),
            work_root: env.or("WORK_ROOT", "work").into(),
            cache_root: env.or("CACHE_ROOT", "cache").into(),
        }
    }
}

impl RegistryConfig {
    fn from_env(env: &Env) -> Result<RegistryConfig, String> {
        Ok(RegistryConfig {
            host: env.required("REGISTRY_HOST")?,
            username: env.required("REGISTRY_USERNAME")?,
            password: SecretString::new(env.required("REGISTRY_PASSWORD")?),
        })
    }
}

impl PipelineConfig {
    fn from_env(env: &Env) -> Result<PipelineConfig, String> {
        let timeout = env.parsed("PIPELINE_TIMEOUT_SECS", 3600u64)?;
        if timeout == 0 {
            return Err("PIPELINE_TIMEOUT_SECS needs to be greater than zero".to_owned());
        }

        let queue_capacity = env.parsed("QUEUE_CAPACITY", 100usize)?;
        if queue_capacity == 0 {
            return Err("QUEUE_CAPACITY needs to be greater than zero".to_owned());
        }

        let max_concurrent = env.parsed("MAX_CONCURRENT_PIPELINES", 0usize)?;

        Ok(PipelineConfig {
            timeout: Duration::from_secs(timeout),
            queue_capacity,
            max_concurrent: (max_concurrent > 0).then_some(max_concurrent),
        })
    }
}

impl ClusterConfig {
    fn from_env(env: &Env) -> Result<ClusterConfig, String> {
        let mode = match env.or("CLUSTER_MODE", "kube").as_str() {
            "kube" => ClusterMode::Kube,
            "dry-run" => ClusterMode::DryRun,
            other => return Err(format!("CLUSTER_MODE must be \"kube\" or \"dry-run\", got \"{other}\"")),
        };

        let external_ips = env
            .optional("CLUSTER_EXTERNAL_IPS")
            .map(|ips| {
                ips.split(',')
                    .map(str::trim)
                    .filter(|ip| !ip.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let update_attempts = env.parsed("CLUSTER_UPDATE_ATTEMPTS", 5u32)?;
        if update_attempts == 0 {
            return Err("CLUSTER_UPDATE_ATTEMPTS needs to be greater than zero".to_owned());
        }

        Ok(ClusterConfig {
            mode,
            external_ips,
            update_attempts,
        })
    }
}

struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_owned())
    }

    fn required(&self, key: &str) -> Result<String, String> {
        self.optional(key)
            .ok_or_else(|| format!("Please provide the {key} environment variable"))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, String> {
        match self.optional(key) {
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| format!("{key} needs to be a non-negative integer")),
            None => Ok(default),
        }
    }
}
