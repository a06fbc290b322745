use thiserror::Error;

/// Record-level data failures with a stable taxonomy. Structural problems
/// (a non-list source) abort the run; the rest are caught per record by the
/// import driver and collected into the run report.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("source data is not a list, is {0}")]
    SourceNotAList(&'static str),
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("malformed date `{0}` (expected YYYY-MM-DD HH:MM:SS)")]
    Date(String),
    #[error("payload from {url} does not decode as an image: {reason}")]
    ImageDecode { url: String, reason: String },
    #[error("parent page {id} has type `{actual}`, expected `{expected}`")]
    ParentType {
        id: i64,
        expected: String,
        actual: String,
    },
}

/// Human-readable JSON type name, used when rejecting a non-list source.
pub fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::{DataError, json_type_name};

    #[test]
    fn messages_name_the_offending_value() {
        let error = DataError::SourceNotAList(json_type_name(&serde_json::json!({})));
        assert_eq!(error.to_string(), "source data is not a list, is an object");

        let error = DataError::MissingField("nid".to_string());
        assert_eq!(error.to_string(), "missing required field `nid`");
    }

    #[test]
    fn date_error_shows_expected_format() {
        let error = DataError::Date("01/02/2020".to_string());
        assert!(error.to_string().contains("YYYY-MM-DD HH:MM:SS"));
    }
}
