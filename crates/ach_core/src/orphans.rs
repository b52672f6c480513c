use std::collections::HashSet;

use serde_json::Value;

use crate::document::{Bill, Document};

const REFERENCE_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileReference<'a> {
    /// The invoice points at a file present in the live set.
    Live(&'a str),
    /// The invoice points at a file that no longer exists.
    Missing(&'a str),
    /// The invoice is absent or not of the form `<doctype>:<file id>`.
    Unreadable,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrphanPartition {
    pub valid: Vec<Document>,
    pub orphaned: Vec<Document>,
}

/// File identifier encoded in the trailing segment of an invoice reference.
pub fn file_reference(document: &Document) -> Option<&str> {
    let invoice = match Bill::new(document).invoice() {
        Some(Value::String(invoice)) => invoice.as_str(),
        _ => return None,
    };
    let (_, file_id) = invoice.rsplit_once(REFERENCE_SEPARATOR)?;
    if file_id.is_empty() {
        None
    } else {
        Some(file_id)
    }
}

pub fn classify<'a>(document: &'a Document, live_file_ids: &HashSet<String>) -> FileReference<'a> {
    match file_reference(document) {
        Some(file_id) if live_file_ids.contains(file_id) => FileReference::Live(file_id),
        Some(file_id) => FileReference::Missing(file_id),
        None => FileReference::Unreadable,
    }
}

/// Splits documents into those whose invoice resolves to a live file and
/// the rest. Unreadable references are orphaned; this never fails.
pub fn partition_orphans(
    documents: &[Document],
    live_file_ids: &HashSet<String>,
) -> OrphanPartition {
    let mut output = OrphanPartition::default();
    for document in documents {
        match classify(document, live_file_ids) {
            FileReference::Live(_) => output.valid.push(document.clone()),
            FileReference::Missing(file_id) => {
                tracing::debug!(
                    bill = document.id().unwrap_or("<no id>"),
                    file_id,
                    "invoice file no longer exists"
                );
                output.orphaned.push(document.clone());
            }
            FileReference::Unreadable => {
                tracing::debug!(
                    bill = document.id().unwrap_or("<no id>"),
                    "invoice reference is missing or malformed"
                );
                output.orphaned.push(document.clone());
            }
        }
    }
    output
}
