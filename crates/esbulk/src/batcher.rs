//! 📦 Batcher: documents in, bounded batches out, bulk payloads on request.
//!
//! 🎬 COLD OPEN: INT. LOADING DOCK, THE `_bulk` ENDPOINT
//!
//! The bulk API has rules.
//! Rule 1: Two lines per document. Action metadata, then document source. Always.
//! Rule 2: Newline-delimited. Not comma-separated. Not XML. NEWLINES.
//! Rule 3: The trailing newline on the whole body matters. It MATTERS.
//!
//! ## Knowledge Graph 🧠
//! - [`Batcher`] accumulates [`Document`]s in arrival order, emits a [`Batch`] every
//!   `batch_size` documents, and a final short batch on [`Batcher::finish`].
//! - [`render_bulk_payload`] turns a batch into the wire body:
//!   `{"index":{"_index":..,"_type":..,"_id":..}}\n<source>\n` per document.
//! - Key order in the action line is `_index`, `_type`, `_id`, fixed by the struct below.
//!   `serde_json::json!` would sort them. We do not let it.

use serde::Serialize;

use crate::decoder::Document;

/// 📦 1..=batch_size documents and a sequence number. The number is for logs only;
/// batches finish in whatever order the network feels like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub sequence: u64,
    pub documents: Vec<Document>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// 🧺 The accumulator. Never holds more than `batch_size` documents.
#[derive(Debug)]
pub struct Batcher {
    batch_size: usize,
    pending: Vec<Document>,
    next_sequence: u64,
}

impl Batcher {
    /// `batch_size` must be > 0. Validation upstream guarantees it; we clamp anyway.
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            pending: Vec::with_capacity(batch_size),
            next_sequence: 1,
        }
    }

    /// ➕ Add a document. Returns a full batch when this document completed one.
    pub fn push(&mut self, document: Document) -> Option<Batch> {
        self.pending.push(document);
        if self.pending.len() >= self.batch_size {
            Some(self.seal())
        } else {
            None
        }
    }

    /// 🏁 Source exhausted: whatever is left becomes the last (possibly short) batch.
    pub fn finish(mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.seal())
        }
    }

    /// How many batches have been sealed so far.
    pub fn emitted(&self) -> u64 {
        self.next_sequence - 1
    }

    fn seal(&mut self) -> Batch {
        let documents = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Batch {
            sequence,
            documents,
        }
    }
}

#[derive(Serialize)]
struct ActionLine<'a> {
    index: ActionMetadata<'a>,
}

#[derive(Serialize)]
struct ActionMetadata<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type", skip_serializing_if = "Option::is_none")]
    doc_type: Option<&'a str>,
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

/// 📡 Render a batch into a `_bulk` request body. 2 lines per document, every line
/// newline-terminated, document order preserved.
///
/// An empty `doc_type` leaves `_type` out, for clusters that retired mapping types.
pub fn render_bulk_payload(
    batch: &Batch,
    index: &str,
    doc_type: &str,
) -> Result<String, serde_json::Error> {
    let doc_type = (!doc_type.is_empty()).then_some(doc_type);
    // 🧮 source bytes + a vibes-based 64 per action line
    let estimated_size: usize = batch
        .documents
        .iter()
        .map(|doc| doc.source.len() + index.len() + 64)
        .sum();
    let mut payload = String::with_capacity(estimated_size);

    for document in &batch.documents {
        let action = ActionLine {
            index: ActionMetadata {
                index,
                doc_type,
                id: document.id.as_deref(),
            },
        };
        push_document(&mut payload, &action, &document.source)?;
    }

    Ok(payload)
}

/// ➕ Append one action/source pair. The action is serialized before anything is
/// appended, so a failure leaves `payload` exactly as it was.
fn push_document<A: Serialize>(
    payload: &mut String,
    action: &A,
    source: &str,
) -> Result<(), serde_json::Error> {
    let action_line = serde_json::to_string(action)?;
    payload.push_str(&action_line);
    payload.push('\n');
    payload.push_str(source);
    payload.push('\n');
    Ok(())
}
