//! Markdown reference list appended to an answer.
//!
//! Built from the `data.reference.chunks` payload of a completion event.
//! Each distinct document is listed once (first occurrence wins) and links
//! to the backend's document viewer.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

const HEADER: &str = "\n\n### References\n";
const UNKNOWN_NAME: &str = "Unknown";

/// `data.reference` of a completion event. Chunks stay raw so one malformed
/// chunk does not cost the whole list.
#[derive(Debug, Deserialize)]
pub struct Reference {
    #[serde(default)]
    pub chunks: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceChunk {
    pub document_id: Option<String>,
    pub document_name: Option<String>,
}

impl ReferenceChunk {
    /// Read one raw chunk. String and numeric ids are accepted; a name that
    /// is not a string counts as missing. `None` for a non-object chunk or an
    /// id of any other type.
    pub fn from_value(value: &Value) -> Option<Self> {
        let chunk = value.as_object()?;
        let document_id = match chunk.get("document_id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            Some(_) => return None,
        };
        let document_name = chunk
            .get("document_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(Self { document_id, document_name })
    }
}

/// Typed chunks from the raw list, skipping (and logging) malformed ones.
pub fn parse_chunks(values: &[Value]) -> Vec<ReferenceChunk> {
    values
        .iter()
        .filter_map(|value| {
            let chunk = ReferenceChunk::from_value(value);
            if chunk.is_none() {
                warn!(chunk = %value, "skipping malformed reference chunk");
            }
            chunk
        })
        .collect()
}

/// Render `chunks` as one fragment: a `### References` header and a bullet
/// per distinct non-empty `document_id`.
pub fn render(base_url: &str, chunks: &[ReferenceChunk]) -> String {
    let mut out = String::from(HEADER);
    let mut seen = HashSet::new();

    for chunk in chunks {
        let Some(doc_id) = chunk.document_id.as_deref().filter(|id| !id.is_empty()) else {
            continue;
        };
        if !seen.insert(doc_id) {
            continue;
        }
        let name = chunk.document_name.as_deref().unwrap_or(UNKNOWN_NAME);
        out.push_str(&format!(
            "\n- [{name}]({})",
            document_url(base_url, doc_id, &extension(name))
        ));
    }
    out
}

/// Viewer link for one document.
pub fn document_url(base_url: &str, doc_id: &str, ext: &str) -> String {
    format!("{base_url}/document/{doc_id}?ext={ext}&prefix=document")
}

/// Lowercased text after the last `.`, or empty when there is none.
pub fn extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.trim().to_lowercase())
        .unwrap_or_default()
}
