use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParserError {
    #[error("Could not read {path}: {message}")]
    Read { path: String, message: String },
    #[error("Unsupported configuration format \"{0}\"")]
    UnsupportedFormat(String),
    #[error("Could not evaluate {path}: {message}")]
    Jsonnet { path: String, message: String },
    #[error("{path} does not describe a pipeline: {source}")]
    Schema {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = core::result::Result<T, ParserError>;
