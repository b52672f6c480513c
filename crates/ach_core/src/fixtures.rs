use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::store::DocumentStore;

/// Fixture documents grouped by doctype, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixtureSet {
    pub collections: Vec<(String, Vec<Value>)>,
}

impl FixtureSet {
    pub fn doctypes(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|(doctype, _)| doctype.clone())
            .collect()
    }

    pub fn document_count(&self) -> usize {
        self.collections.iter().map(|(_, docs)| docs.len()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DoctypeImportReport {
    pub doctype: String,
    pub created: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    pub doctypes: Vec<DoctypeImportReport>,
}

impl ImportReport {
    pub fn created(&self) -> usize {
        self.doctypes.iter().map(|report| report.created).sum()
    }

    pub fn errors(&self) -> usize {
        self.doctypes.iter().map(|report| report.errors.len()).sum()
    }
}

pub fn load_fixture_file(path: &Path) -> Result<FixtureSet> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_fixtures(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Parses `{ "<doctype>": [ {...}, ... ], ... }`.
pub fn parse_fixtures(content: &str) -> Result<FixtureSet> {
    let root: Value = serde_json::from_str(content).context("fixture file is not valid JSON")?;
    let Value::Object(entries) = root else {
        bail!("fixture file must be a JSON object keyed by doctype");
    };

    let mut collections = Vec::with_capacity(entries.len());
    for (doctype, documents) in entries {
        if doctype.trim().is_empty() {
            bail!("fixture doctype cannot be empty");
        }
        let Value::Array(documents) = documents else {
            bail!("fixtures for {doctype} must be an array of documents");
        };
        if let Some(position) = documents.iter().position(|doc| !doc.is_object()) {
            bail!("fixture {doctype}[{position}] is not a JSON object");
        }
        collections.push((doctype, documents));
    }
    Ok(FixtureSet { collections })
}

/// Creates every fixture document in order. A failed document is recorded
/// and the import carries on with the next one.
pub fn import_fixtures<S: DocumentStore>(store: &mut S, fixtures: &FixtureSet) -> ImportReport {
    let mut report = ImportReport::default();
    for (doctype, documents) in &fixtures.collections {
        let mut doctype_report = DoctypeImportReport {
            doctype: doctype.clone(),
            ..DoctypeImportReport::default()
        };
        for (position, document) in documents.iter().enumerate() {
            match store.create_document(doctype, document) {
                Ok(_) => doctype_report.created += 1,
                Err(error) => {
                    tracing::warn!("failed to import {doctype}[{position}]: {error:#}");
                    doctype_report
                        .errors
                        .push(format!("{doctype}[{position}]: {error:#}"));
                }
            }
        }
        tracing::info!(
            doctype = doctype.as_str(),
            created = doctype_report.created,
            "imported fixtures"
        );
        report.doctypes.push(doctype_report);
    }
    report
}
