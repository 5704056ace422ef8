use crate::frontier::Target;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One extracted record, written as a single JSON line
///
/// Immutable once built; ownership moves to the sink writer on emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    target: String,
    fetched_at: DateTime<Utc>,
    data: serde_json::Value,
}

impl ExtractedRecord {
    /// Builds a record for `target` stamped with the current time
    pub fn new(target: &Target, data: serde_json::Value) -> Self {
        Self {
            target: target.as_str().to_string(),
            fetched_at: Utc::now(),
            data,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Serializes the record as one newline-terminated JSON line
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
