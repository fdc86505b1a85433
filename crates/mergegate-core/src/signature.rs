//! Evidence signatures and stagnation detection for iterative loops.
//!
//! A delegation loop feeds each iteration's result batch to
//! [`SignatureTracker::check_novelty`]. The tracker reduces the batch to a
//! SHA-256 digest of its evidence and counts how many consecutive batches
//! repeated the previous digest. [`SignatureTracker::is_converged`] tells the
//! loop when that count reached its threshold.
//!
//! Digests are order-insensitive: list values are sorted before hashing and
//! the extracted strings of the whole batch are sorted before joining.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::domain::report::TaskReport;

pub const DEFAULT_EVIDENCE_KEYS: &[&str] = &["result", "summary", "findings", "output"];

const SEPARATOR: &str = "|";

/// Something a signature can be computed from.
pub trait EvidenceSource {
    /// Value stored under `key` in the record's metadata, if any.
    fn evidence(&self, key: &str) -> Option<Value>;

    /// Free-text fallback used when no evidence key is present.
    fn text(&self) -> Option<String> {
        None
    }

    /// Last-resort string form of the whole record.
    fn fallback_repr(&self) -> String;
}

/// Plain key/value records.
impl EvidenceSource for Value {
    fn evidence(&self, key: &str) -> Option<Value> {
        self.as_object()?.get(key).cloned()
    }

    fn fallback_repr(&self) -> String {
        canonical_string(self)
    }
}

/// A record with an optional metadata map and a text field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl EvidenceRecord {
    pub fn with_metadata(metadata: Map<String, Value>) -> Self {
        Self {
            metadata: Some(metadata),
            text: None,
        }
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            metadata: None,
            text: Some(text.into()),
        }
    }
}

impl EvidenceSource for EvidenceRecord {
    fn evidence(&self, key: &str) -> Option<Value> {
        self.metadata.as_ref()?.get(key).cloned()
    }

    fn text(&self) -> Option<String> {
        self.text.clone()
    }

    fn fallback_repr(&self) -> String {
        serde_json::to_value(self)
            .map(|v| canonical_string(&v))
            .unwrap_or_else(|_| format!("{self:?}"))
    }
}

impl EvidenceSource for TaskReport {
    fn evidence(&self, key: &str) -> Option<Value> {
        match key {
            "agent" => Some(Value::String(self.agent.clone())),
            "summary" => Some(Value::String(self.summary.clone())),
            "severity" => Some(Value::String(self.severity.to_string())),
            "decision" => Some(Value::String(self.merge_gate.decision.to_string())),
            "findings" => Some(Value::Array(
                self.findings
                    .iter()
                    .map(|f| Value::String(format!("{}:{}", f.id, f.severity)))
                    .collect(),
            )),
            _ => None,
        }
    }

    fn text(&self) -> Option<String> {
        Some(self.summary.clone())
    }

    fn fallback_repr(&self) -> String {
        serde_json::to_value(self)
            .map(|v| canonical_string(&v))
            .unwrap_or_else(|_| format!("{self:?}"))
    }
}

/// Per-loop signature history and stagnation counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureTracker {
    evidence_keys: Vec<String>,
    history: Vec<String>,
    stagnation: u32,
}

impl Default for SignatureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_EVIDENCE_KEYS.iter().copied())
    }
}

impl SignatureTracker {
    pub fn new<I, S>(evidence_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            evidence_keys: evidence_keys.into_iter().map(Into::into).collect(),
            history: Vec::new(),
            stagnation: 0,
        }
    }

    pub fn evidence_keys(&self) -> &[String] {
        &self.evidence_keys
    }

    /// Signatures recorded so far, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn stagnation_count(&self) -> u32 {
        self.stagnation
    }

    /// Hex SHA-256 digest of the batch's evidence.
    pub fn compute_signature<S: EvidenceSource>(&self, batch: &[S]) -> String {
        let mut parts: Vec<String> = batch
            .iter()
            .flat_map(|record| self.extract(record))
            .collect();
        parts.sort();

        let mut hasher = Sha256::new();
        hasher.update(parts.join(SEPARATOR).as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Record the batch and report whether it differs from the previous one.
    ///
    /// An empty batch is never novel and leaves the state untouched.
    pub fn check_novelty<S: EvidenceSource>(&mut self, batch: &[S]) -> bool {
        if batch.is_empty() {
            return false;
        }
        let signature = self.compute_signature(batch);
        if self.history.last() == Some(&signature) {
            self.stagnation += 1;
            tracing::debug!(stagnation = self.stagnation, "signature repeated");
            return false;
        }
        self.history.push(signature);
        self.stagnation = 0;
        true
    }

    pub fn is_converged(&self, threshold: u32) -> bool {
        self.stagnation >= threshold
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.stagnation = 0;
    }

    fn extract<S: EvidenceSource>(&self, record: &S) -> Vec<String> {
        let found: Vec<String> = self
            .evidence_keys
            .iter()
            .filter_map(|key| record.evidence(key))
            .map(|value| normalize(&value))
            .collect();
        if !found.is_empty() {
            return found;
        }
        vec![record.text().unwrap_or_else(|| record.fallback_repr())]
    }
}

/// Lists are sorted (order-insensitive), maps rendered as canonical JSON,
/// strings taken verbatim.
fn normalize(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let mut rendered: Vec<String> = items.iter().map(normalize).collect();
            rendered.sort();
            format!("[{}]", rendered.join(","))
        }
        Value::Object(_) => canonical_string(value),
        other => other.to_string(),
    }
}

/// Compact JSON with object keys sorted at every level.
fn canonical_string(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let fields: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical_string(v)))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let rendered: Vec<String> = items.iter().map(canonical_string).collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}
