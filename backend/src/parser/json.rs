use domain::PipelineConfiguration;

use super::{
    error::{ParserError, Result},
    PipelineParser,
};

pub struct JsonParser;

impl PipelineParser for JsonParser {
    fn parse(&self, path: &str, content: &str) -> Result<PipelineConfiguration> {
        serde_json::from_str(content).map_err(|source| ParserError::Schema {
            path: path.to_owned(),
            source,
        })
    }
}
