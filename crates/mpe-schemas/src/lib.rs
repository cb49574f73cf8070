use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub client_id: Uuid,
    pub ts_utc: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub topic: String,
    pub event_type: String,
    pub payload: T,
}

/// One raw row as handed over by the upstream CSV extractor.
///
/// Field names are the (already normalized, lowercase) column headers;
/// values are untrimmed cell contents. Monetary values cross this boundary
/// as strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    pub row_number: u32,
    pub fields: BTreeMap<String, String>,
}

impl RawRow {
    pub fn new(row_number: u32) -> Self {
        Self {
            row_number,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    /// Trimmed field lookup; empty-after-trim counts as absent.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileApproved {
    pub file_id: Uuid,
    pub client_id: Uuid,
    pub currency: String,
    pub total_amount: String,
    pub approved_by: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCompleted {
    pub file_id: Uuid,
    pub client_id: Uuid,
    pub succeeded: u32,
    pub failed: u32,
    pub settled_total: String,
    pub released_total: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailed {
    pub file_id: Uuid,
    pub client_id: Uuid,
    pub failed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionFailed {
    pub instruction_id: Uuid,
    pub file_id: Uuid,
    pub row_ordinal: u32,
    pub reason: String,
}
