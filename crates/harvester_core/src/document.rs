use serde_json::Value;

use crate::candidate::Candidate;

/// A harvested workflow: syntactically valid JSON plus where it came from.
///
/// No schema is enforced on `content`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDocument {
    source: Candidate,
    content: Value,
    suggested_name: String,
}

impl WorkflowDocument {
    /// Document recovered from image metadata; the name gets `suffix` appended to the stem.
    pub fn extracted(source: Candidate, content: Value, suffix: &str) -> Self {
        let suggested_name = format!("{}{}", source.stem(), suffix);
        Self {
            source,
            content,
            suggested_name,
        }
    }

    /// Document taken verbatim from a JSON file; keeps the original stem.
    pub fn passthrough(source: Candidate, content: Value) -> Self {
        let suggested_name = source.stem().to_string();
        Self {
            source,
            content,
            suggested_name,
        }
    }

    pub fn source(&self) -> &Candidate {
        &self.source
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Output name without the `.json` extension.
    pub fn suggested_name(&self) -> &str {
        &self.suggested_name
    }
}
