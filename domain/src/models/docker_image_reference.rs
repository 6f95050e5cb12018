use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// `[<hostname>/]<repository>[:<tag>]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DockerImageReference {
    pub hostname: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
}

impl DockerImageReference {
    /// `{registry}/{owner}/{image}:{tag}` with owner and image lowercased.
    pub fn for_repository(registry: &str, owner: &str, image: &str, tag: &str) -> Self {
        let hostname = Some(registry.trim_end_matches('/').to_owned()).filter(|h| !h.is_empty());

        Self {
            hostname,
            repository: format!("{}/{}", owner.to_lowercase(), image.to_lowercase()),
            tag: Some(tag.to_owned()),
        }
    }

    /// The reference without its tag, as the registry addresses the image.
    pub fn name(&self) -> String {
        match &self.hostname {
            Some(hostname) => format!("{hostname}/{}", self.repository),
            None => self.repository.clone(),
        }
    }

    pub fn tag_or_latest(&self) -> &str {
        self.tag.as_deref().unwrap_or("latest")
    }
}

impl FromStr for DockerImageReference {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err("image reference must not be empty".to_owned());
        }

        let (hostname, rest) = match value.split_once('/') {
            Some((hostname, rest))
                if hostname.contains(['.', ':']) || hostname == "localhost" =>
            {
                (Some(hostname.to_owned()), rest)
            }
            _ => (None, value),
        };

        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repository, tag)) if !tag.contains('/') => {
                (repository.to_owned(), Some(tag.to_owned()))
            }
            _ => (rest.to_owned(), None),
        };

        if repository.is_empty() {
            return Err(format!("image reference \"{value}\" has no repository"));
        }

        Ok(Self {
            hostname,
            repository,
            tag,
        })
    }
}

impl Serialize for DockerImageReference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DockerImageReference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

impl Display for DockerImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        Ok(())
    }
}
