//! Recovery of workflow documents embedded in image metadata.
//!
//! PNG text chunks (`tEXt`, `zTXt`, `iTXt`) are searched for a `parameters` key,
//! then a `workflow` key. The first match is run through an ordered list of
//! payload decoders; the first decoder that yields JSON wins.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use harvest_logging::harvest_debug;
use harvester_core::{Candidate, WorkflowDocument};
use serde_json::Value;

/// Metadata keys inspected, in priority order.
pub const WORKFLOW_KEYS: [&str; 2] = ["parameters", "workflow"];

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// A pure decoding strategy from a metadata string to JSON.
pub type PayloadDecoder = fn(&str) -> Option<Value>;

/// Direct JSON first, then base64-wrapped JSON.
pub const DEFAULT_DECODERS: &[PayloadDecoder] = &[decode_json, decode_base64_json];

/// One keyword/text pair from an image's auxiliary text metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextField {
    pub keyword: String,
    pub text: String,
}

/// Result of inspecting one image. Never an error: every failure is a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Found(WorkflowDocument),
    /// No `parameters`/`workflow` field present.
    Miss,
    /// A field was present but no decoder could turn it into JSON.
    MalformedPayload { key: String },
    /// The bytes could not be decoded as a supported image.
    Unreadable { reason: String },
}

impl Extraction {
    pub fn into_document(self) -> Option<WorkflowDocument> {
        match self {
            Extraction::Found(doc) => Some(doc),
            _ => None,
        }
    }

    /// Human-readable reason for a non-`Found` outcome.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Extraction::Found(_) => None,
            Extraction::Miss => Some("no workflow metadata found in image".to_string()),
            Extraction::MalformedPayload { key } => {
                Some(format!("`{key}` metadata is neither JSON nor base64-encoded JSON"))
            }
            Extraction::Unreadable { reason } => Some(format!("unreadable image: {reason}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    suffix: String,
    decoders: Vec<PayloadDecoder>,
}

impl MetadataExtractor {
    /// `suffix` is appended to the image stem to form the document name.
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            decoders: DEFAULT_DECODERS.to_vec(),
        }
    }

    pub fn with_decoders(mut self, decoders: Vec<PayloadDecoder>) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn extract(&self, candidate: &Candidate, image_bytes: &[u8]) -> Extraction {
        let fields = match read_text_fields(image_bytes) {
            Ok(fields) => fields,
            Err(reason) => return Extraction::Unreadable { reason },
        };
        let Some((key, payload)) = find_payload(&fields) else {
            return Extraction::Miss;
        };
        match self.decode_payload(payload) {
            Some(content) => Extraction::Found(WorkflowDocument::extracted(
                candidate.clone(),
                content,
                &self.suffix,
            )),
            None => Extraction::MalformedPayload {
                key: key.to_string(),
            },
        }
    }

    pub fn decode_payload(&self, payload: &str) -> Option<Value> {
        self.decoders.iter().find_map(|decode| decode(payload))
    }
}

impl Default for MetadataExtractor {
    fn default() -> Self {
        Self::new("_workflow")
    }
}

/// First field whose keyword matches [`WORKFLOW_KEYS`], honoring key priority.
pub fn find_payload(fields: &[TextField]) -> Option<(&str, &str)> {
    WORKFLOW_KEYS.iter().find_map(|key| {
        fields
            .iter()
            .find(|field| field.keyword == *key)
            .map(|field| (*key, field.text.as_str()))
    })
}

pub fn decode_json(payload: &str) -> Option<Value> {
    serde_json::from_str(payload).ok()
}

pub fn decode_base64_json(payload: &str) -> Option<Value> {
    let compact: String = payload.split_whitespace().collect();
    let raw = STANDARD.decode(compact).ok()?;
    let text = String::from_utf8(raw).ok()?;
    serde_json::from_str(&text).ok()
}

/// All text metadata of a PNG, including chunks stored after the image data.
///
/// When the image data or trailing chunks are damaged, whatever text appeared
/// before the damage is still returned. A bad header, or damage with no text
/// ahead of it, is an error.
pub fn read_text_fields(bytes: &[u8]) -> Result<Vec<TextField>, String> {
    if !bytes.starts_with(&PNG_SIGNATURE) {
        return Err(format!("unsupported image format ({})", sniff_format(bytes)));
    }

    let decoder = png::Decoder::new(Cursor::new(bytes));
    let mut reader = decoder.read_info().map_err(|err| err.to_string())?;
    // Skips the pixel data; text chunks stored after it are still parsed.
    let trailing = reader.finish().map_err(|err| err.to_string());
    let fields = collect_text(reader.info());
    match trailing {
        Ok(()) => Ok(fields),
        Err(reason) if !fields.is_empty() => {
            harvest_debug!("Keeping {} text field(s) from damaged PNG: {}", fields.len(), reason);
            Ok(fields)
        }
        Err(reason) => Err(reason),
    }
}


fn collect_text(info: &png::Info<'_>) -> Vec<TextField> {
    let mut fields = Vec::new();
    for chunk in &info.uncompressed_latin1_text {
        fields.push(TextField {
            keyword: chunk.keyword.clone(),
            text: chunk.text.clone(),
        });
    }
    for chunk in &info.compressed_latin1_text {
        if let Ok(text) = chunk.get_text() {
            fields.push(TextField {
                keyword: chunk.keyword.clone(),
                text,
            });
        }
    }
    for chunk in &info.utf8_text {
        if let Ok(text) = chunk.get_text() {
            fields.push(TextField {
                keyword: chunk.keyword.clone(),
                text,
            });
        }
    }
    fields
}

fn sniff_format(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else {
        "unknown"
    }
}
