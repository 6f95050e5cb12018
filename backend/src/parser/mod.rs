pub mod error;
mod json;
mod jsonnet;

use std::path::Path;

use self::{
    error::{ParserError, Result},
    json::JsonParser,
    jsonnet::JsonnetParser,
};
use domain::PipelineConfiguration;
use source_control::SourceRepository;

/// Looked up in this order; the first one present at the commit wins.
pub const CONFIGURATION_FILES: [&str; 4] = [
    ".ci/pipeline.jsonnet",
    ".ci/pipeline.json",
    ".pipeline.jsonnet",
    ".pipeline.json",
];

/// `None` when the commit carries no pipeline configuration at all.
pub async fn find_pipeline<R>(repository: &R, commit: &str) -> Result<Option<(String, PipelineConfiguration)>>
where
    R: SourceRepository,
{
    for path in CONFIGURATION_FILES {
        let content = repository
            .read_file_contents(commit, path)
            .await
            .map_err(|err| ParserError::Read {
                path: path.to_owned(),
                message: err.to_string(),
            })?;

        if let Some(content) = content {
            let configuration = parse_pipeline(path, &content)?;
            return Ok(Some((path.to_owned(), configuration)));
        }
    }

    Ok(None)
}

pub fn parse_pipeline(path: &str, content: &str) -> Result<PipelineConfiguration> {
    let file_extension = Path::new(path).extension().unwrap_or_default();
    match file_extension.to_str() {
        Some("jsonnet") | Some("libsonnet") => {
            let parser = JsonnetParser;
            Ok(parser.parse(path, content)?)
        }
        Some("json") => {
            let parser = JsonParser;
            Ok(parser.parse(path, content)?)
        }
        extension => Err(ParserError::UnsupportedFormat(
            extension.unwrap_or_default().to_owned(),
        )),
    }
}

trait PipelineParser {
    fn parse(&self, path: &str, content: &str) -> Result<PipelineConfiguration>;
}
