use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Result, bail};
use serde_json::Value;

use crate::document::Document;
use crate::store::{DocumentStore, FolderStat};

/// In-memory `DocumentStore` recording every call it receives.
#[derive(Default)]
pub struct MemoryStore {
    pub collections: BTreeMap<String, Vec<Document>>,
    pub folders: BTreeMap<String, Vec<String>>,
    pub fail_fetch: Option<String>,
    pub fail_delete: bool,
    /// Documents or entries with this name are rejected on creation.
    pub reject_name: Option<String>,
    pub stat_calls: Vec<String>,
    pub deleted: Vec<(String, Vec<String>)>,
    pub delete_calls: usize,
    pub created: Vec<(String, Value)>,
    pub directories: Vec<(String, String, String)>,
    pub uploads: Vec<(String, String, String)>,
    pub journal: Rc<RefCell<Vec<String>>>,
    pub request_count: usize,
}

impl MemoryStore {
    pub fn add_folder(&mut self, path: &str, children: &[&str]) {
        self.folders.insert(
            path.to_string(),
            children.iter().map(|child| (*child).to_string()).collect(),
        );
    }

    fn record(&mut self, event: String) {
        self.request_count += 1;
        self.journal.borrow_mut().push(event);
    }

    fn rejects(&self, name: &str) -> bool {
        self.reject_name.as_deref() == Some(name)
    }
}

impl DocumentStore for MemoryStore {
    fn fetch_all(&mut self, doctype: &str) -> Result<Vec<Document>> {
        self.record(format!("fetch:{doctype}"));
        if self.fail_fetch.as_deref() == Some(doctype) {
            bail!("connection reset while fetching {doctype}");
        }
        Ok(self.collections.get(doctype).cloned().unwrap_or_default())
    }

    fn delete_all(&mut self, doctype: &str, documents: &[Document]) -> Result<()> {
        let ids = documents
            .iter()
            .filter_map(|document| document.id().map(ToString::to_string))
            .collect::<Vec<_>>();
        self.record(format!("delete:{doctype}:{}", ids.join(",")));
        self.delete_calls += 1;
        if self.fail_delete {
            bail!("bulk delete rejected");
        }
        if let Some(collection) = self.collections.get_mut(doctype) {
            collection.retain(|document| {
                document
                    .id()
                    .is_none_or(|id| !ids.iter().any(|deleted| deleted == id))
            });
        }
        self.deleted.push((doctype.to_string(), ids));
        Ok(())
    }

    fn stat_by_path(&mut self, path: &str) -> Result<FolderStat> {
        self.record(format!("stat:{path}"));
        self.stat_calls.push(path.to_string());
        match self.folders.get(path) {
            Some(children) => Ok(FolderStat {
                id: format!("dir:{path}"),
                children: children.clone(),
            }),
            None => bail!("stack request failed with HTTP 404 Not Found: {path}"),
        }
    }

    fn create_document(&mut self, doctype: &str, document: &Value) -> Result<Document> {
        self.record(format!("create:{doctype}"));
        if let Some(name) = document.get("name").and_then(Value::as_str)
            && self.rejects(name)
        {
            bail!("document rejected: {name}");
        }
        self.created.push((doctype.to_string(), document.clone()));
        let mut stored = document.clone();
        stored["_id"] = Value::String(format!("doc-{}", self.created.len()));
        Ok(serde_json::from_value(stored)?)
    }

    fn create_directory(&mut self, parent_id: &str, name: &str) -> Result<String> {
        self.record(format!("mkdir:{name}"));
        if self.rejects(name) {
            bail!("directory rejected: {name}");
        }
        let id = format!("dir-{}", self.directories.len() + 1);
        self.directories
            .push((parent_id.to_string(), name.to_string(), id.clone()));
        Ok(id)
    }

    fn upload_file(
        &mut self,
        parent_id: &str,
        name: &str,
        _content: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        self.record(format!("upload:{name}"));
        if self.rejects(name) {
            bail!("file rejected: {name}");
        }
        self.uploads.push((
            parent_id.to_string(),
            name.to_string(),
            content_type.to_string(),
        ));
        Ok(format!("file-{}", self.uploads.len()))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
