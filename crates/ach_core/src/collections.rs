use anyhow::{Context, Result, bail};

use crate::store::DocumentStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropReport {
    pub doctype: String,
    pub deleted: usize,
}

/// Deletes every document of each doctype. Stops at the first failure;
/// collections already dropped stay dropped.
pub fn drop_collections<S: DocumentStore>(
    store: &mut S,
    doctypes: &[String],
) -> Result<Vec<DropReport>> {
    if doctypes.is_empty() {
        bail!("drop requires at least one doctype");
    }

    let mut reports = Vec::with_capacity(doctypes.len());
    for doctype in doctypes {
        let documents = store
            .fetch_all(doctype)
            .with_context(|| format!("failed to fetch {doctype}"))?;
        if !documents.is_empty() {
            store
                .delete_all(doctype, &documents)
                .with_context(|| format!("failed to drop {doctype}"))?;
        }
        tracing::info!(doctype = doctype.as_str(), deleted = documents.len(), "dropped collection");
        reports.push(DropReport {
            doctype: doctype.clone(),
            deleted: documents.len(),
        });
    }
    Ok(reports)
}
