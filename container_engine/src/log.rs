use serde::{Deserialize, Serialize};
use serde_json::json;

/// Result of a build or push: the full newline-delimited JSON log and the
/// error carried by its last record, if any.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineOutput {
    pub log: String,
    pub success: bool,
    pub error: Option<StructuredError>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructuredError {
    pub message: String,
    pub code: Option<i64>,
}

/// Accumulates streamed engine records as one JSON document per line.
#[derive(Default, Debug)]
pub struct LogCollector {
    text: String,
}

#[derive(Deserialize)]
struct LogRecord {
    error: Option<String>,
    #[serde(rename = "errorDetail", alias = "error_detail")]
    error_detail: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    code: Option<i64>,
    message: Option<String>,
}

impl LogCollector {
    pub fn push_record<T: Serialize>(&mut self, record: &T) {
        match serde_json::to_string(record) {
            Ok(line) => self.push_line(&line),
            Err(err) => tracing::warn!(error = %err, "dropping unserializable engine record"),
        }
    }

    /// Records an error the engine reported out of band (stream or transport).
    pub fn push_error(&mut self, message: &str) {
        let record = json!({ "error": message, "errorDetail": { "message": message } });
        self.push_line(&record.to_string());
    }

    fn push_line(&mut self, line: &str) {
        self.text.push_str(line.trim_end());
        self.text.push('\n');
    }

    pub fn finish(self) -> EngineOutput {
        let error = StructuredError::from_log(&self.text);

        EngineOutput {
            success: error.is_none(),
            log: self.text,
            error,
        }
    }
}

impl StructuredError {
    /// Parses the last non-empty line of a JSON-lines log as an error record.
    pub fn from_log(log: &str) -> Option<Self> {
        let last = log.lines().rev().find(|line| !line.trim().is_empty())?;
        let record: LogRecord = serde_json::from_str(last).ok()?;

        let detail_message = record
            .error_detail
            .as_ref()
            .and_then(|detail| detail.message.clone())
            .filter(|message| !message.is_empty());
        let message = record
            .error
            .filter(|message| !message.is_empty())
            .or(detail_message)?;

        Some(Self {
            message,
            code: record.error_detail.and_then(|detail| detail.code),
        })
    }
}
