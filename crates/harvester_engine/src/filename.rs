use harvester_core::{Candidate, MediaHint, WorkflowDocument, JSON_EXTENSION};
use sha2::{Digest, Sha256};

const MAX_COMPONENT_CHARS: usize = 120;

/// Output filename for a document; depends only on its source candidate.
///
/// The plain `{name}.json` form is reserved for a top-level candidate whose
/// name survives sanitizing unchanged and carries the canonical lowercase
/// extension. Within one source such names cannot collide, so every other
/// candidate is qualified with the hash of its location.
pub fn document_filename(doc: &WorkflowDocument) -> String {
    let candidate = doc.source();
    let name = doc.suggested_name();
    if candidate.is_top_level()
        && has_canonical_extension(candidate)
        && sanitize_component(name) == name
    {
        workflow_filename(name)
    } else {
        disambiguated_filename(name, candidate.location().as_str())
    }
}

fn has_canonical_extension(candidate: &Candidate) -> bool {
    let canonical = match candidate.media() {
        MediaHint::Json => JSON_EXTENSION,
        MediaHint::Image => "png",
        MediaHint::Unknown => return false,
    };
    candidate
        .name()
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext == canonical)
}

/// Output filename for a workflow: `{sanitized_name}.json`.
pub fn workflow_filename(suggested_name: &str) -> String {
    format!("{}.json", sanitize_component(suggested_name))
}

/// Collision-free variant: `{sanitized_name}--{short_hash(location)}.json`.
pub fn disambiguated_filename(suggested_name: &str, location: &str) -> String {
    format!(
        "{}--{}.json",
        sanitize_component(suggested_name),
        short_hash(location)
    )
}

/// Windows-safe single path component. Never empty.
pub fn sanitize_component(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]);

    // Collapse runs of underscores.
    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        compacted.push(c);
    }

    let mut final_name: String = compacted.chars().take(MAX_COMPONENT_CHARS).collect();
    if final_name.is_empty() {
        final_name = "untitled".to_string();
    }
    if is_reserved_windows_name(&final_name) {
        final_name.push('_');
    }
    final_name
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    let stem = name.split('.').next().unwrap_or(name);
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(stem))
}

fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}
