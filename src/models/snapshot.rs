// Snapshot: merged outcome of one aggregation

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{FailureKind, ProbeError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    Success(Value),
    Failure { kind: FailureKind, message: String },
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeResult::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            ProbeResult::Success(v) => Some(v),
            ProbeResult::Failure { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ProbeResult::Success(_) => None,
            ProbeResult::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl From<Result<Value, ProbeError>> for ProbeResult {
    fn from(r: Result<Value, ProbeError>) -> Self {
        match r {
            Ok(v) => ProbeResult::Success(v),
            Err(e) => ProbeResult::Failure {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    /// Every probe succeeded.
    Complete,
    /// At least one success and at least one failure.
    Partial,
    /// Nothing succeeded.
    Empty,
    /// The overall deadline fired before any result arrived.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub name: String,
    pub result: ProbeResult,
    pub(crate) flatten: bool,
}

/// One aggregation's results in declaration order. Immutable once returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    domain: String,
    entries: Vec<SnapshotEntry>,
    completeness: Completeness,
}

impl Snapshot {
    pub(crate) fn new(domain: String, entries: Vec<SnapshotEntry>, timed_out: bool) -> Self {
        let ok = entries.iter().filter(|e| e.result.is_success()).count();
        let completeness = if ok == entries.len() {
            Completeness::Complete
        } else if ok > 0 {
            Completeness::Partial
        } else if timed_out {
            Completeness::TimedOut
        } else {
            Completeness::Empty
        };
        Self {
            domain,
            entries,
            completeness,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn completeness(&self) -> Completeness {
        self.completeness
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ProbeResult> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.result)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// True when at least one probe produced data.
    pub fn has_data(&self) -> bool {
        matches!(
            self.completeness,
            Completeness::Complete | Completeness::Partial
        )
    }
}

/// Wire form: flat snake_case keys, `null` for failed probes (flattened probes simply
/// contribute no keys), an `errors` object when anything failed, and `completeness`.
impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        let mut errors = serde_json::Map::new();
        for entry in &self.entries {
            match &entry.result {
                ProbeResult::Success(Value::Object(fields)) if entry.flatten => {
                    for (k, v) in fields {
                        map.serialize_entry(k, v)?;
                    }
                }
                ProbeResult::Success(v) => map.serialize_entry(&entry.name, v)?,
                ProbeResult::Failure { kind, message } => {
                    if !entry.flatten {
                        map.serialize_entry(&entry.name, &Value::Null)?;
                    }
                    errors.insert(
                        entry.name.clone(),
                        serde_json::json!({ "kind": kind, "message": message }),
                    );
                }
            }
        }
        if !errors.is_empty() {
            map.serialize_entry("errors", &errors)?;
        }
        map.serialize_entry("completeness", &self.completeness)?;
        map.end()
    }
}
