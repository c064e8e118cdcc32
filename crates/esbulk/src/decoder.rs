//! 🧩 Document Decoder: is this line JSON, and if so, who is it?
//!
//! One [`RawLine`] in, one [`Document`] out (or a verdict that it was broken).
//! Without an id field we only validate, borrowing a `RawValue` so no tree gets built.
//! With an id field we parse for real and dig out the identifier.
//!
//! The source text is kept byte-for-byte. The bulk payload sends what the file had.

use serde_json::Value;
use serde_json::value::RawValue;

use crate::lines::RawLine;

/// 📄 A line that proved it is JSON, plus its identifier if one was asked for and found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Input line number, for diagnostics.
    pub line: u64,
    /// The raw JSON text, exactly as read.
    pub source: String,
    pub id: Option<String>,
}

/// 💔 Why a line did not make it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub line: u64,
    pub reason: String,
}

/// 🔍 Decoder configured with an optional id field path (`a.b.c` walks nested objects).
#[derive(Debug, Clone, Default)]
pub struct DocumentDecoder {
    id_path: Option<Vec<String>>,
}

impl DocumentDecoder {
    pub fn new(id_field: Option<&str>) -> Self {
        Self {
            id_path: id_field.map(|field| field.split('.').map(str::to_string).collect()),
        }
    }

    /// 🧪 Decode one line. Absence of the id field is not an error; the id is just `None`.
    pub fn decode(&self, raw: RawLine) -> Result<Document, DecodeFailure> {
        let RawLine { number, bytes } = raw;
        let source = String::from_utf8(bytes).map_err(|err| DecodeFailure {
            line: number,
            reason: format!("not valid UTF-8: {err}"),
        })?;
        let trimmed = source.trim();

        let id = match &self.id_path {
            None => {
                serde_json::from_str::<&RawValue>(trimmed).map_err(|err| DecodeFailure {
                    line: number,
                    reason: err.to_string(),
                })?;
                None
            }
            Some(path) => {
                let value: Value = serde_json::from_str(trimmed).map_err(|err| DecodeFailure {
                    line: number,
                    reason: err.to_string(),
                })?;
                lookup(&value, path).and_then(identifier_text)
            }
        };

        let retrimmed = (trimmed.len() != source.len()).then(|| trimmed.to_string());
        let source = retrimmed.unwrap_or(source);
        Ok(Document {
            line: number,
            source,
            id,
        })
    }
}

fn lookup<'v>(value: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter()
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// 🏷️ Strings verbatim, scalars as their JSON text, null as "no id", containers compact.
fn identifier_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
