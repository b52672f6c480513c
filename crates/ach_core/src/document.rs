use serde::Deserialize;
use serde_json::{Map, Value};

pub const DOCTYPE_BILLS: &str = "io.cozy.bills";
pub const DOCTYPE_FILES: &str = "io.cozy.files";
pub const DOCTYPE_ACCOUNTS: &str = "io.cozy.accounts";

pub const ROOT_DIR_ID: &str = "io.cozy.files.root-dir";

/// A stored document: a JSON object whose identifier lives in `_id`.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn id(&self) -> Option<&str> {
        self.str_field("_id")
    }

    pub fn rev(&self) -> Option<&str> {
        self.str_field("_rev")
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }
}

/// Read-only view over an `io.cozy.accounts` document.
#[derive(Debug, Clone, Copy)]
pub struct Account<'a>(&'a Document);

impl<'a> Account<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self(document)
    }

    pub fn id(&self) -> Option<&'a str> {
        self.0.id()
    }

    pub fn account_type(&self) -> Option<&'a str> {
        self.0.str_field("account_type")
    }

    pub fn folder_path(&self) -> Option<&'a str> {
        self.0
            .get("auth")
            .and_then(|auth| auth.get("folderPath"))
            .and_then(Value::as_str)
            .filter(|path| !path.trim().is_empty())
    }
}

/// Read-only view over an `io.cozy.bills` document.
#[derive(Debug, Clone, Copy)]
pub struct Bill<'a>(&'a Document);

impl<'a> Bill<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self(document)
    }

    pub fn vendor(&self) -> Option<&'a str> {
        self.0.str_field("vendor")
    }

    /// Raw invoice reference, e.g. `io.cozy.files:<file id>`.
    pub fn invoice(&self) -> Option<&'a Value> {
        self.0.get("invoice")
    }
}

/// A document scheduled for deletion. `original` names the survivor it
/// duplicates; orphaned documents carry no `original`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovalRecord {
    pub document: Document,
    pub original: Option<String>,
}

impl RemovalRecord {
    pub fn orphaned(document: Document) -> Self {
        Self {
            document,
            original: None,
        }
    }

    pub fn duplicate_of(document: Document, original: &str) -> Self {
        Self {
            document,
            original: Some(original.to_string()),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.document.id()
    }
}

#[cfg(test)]
pub(crate) fn doc(value: Value) -> Document {
    serde_json::from_value(value).expect("object document")
}
