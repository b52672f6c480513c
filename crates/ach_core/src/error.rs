use thiserror::Error;

/// Failure classes of the bill reconciliation run. Remote failures keep the
/// underlying transport error as their source.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("duplicate group survivor has no _id (key fields: {fields})")]
    MissingIdentifier { fields: String },
    #[error("failed to fetch {doctype}")]
    FetchFailed {
        doctype: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("failed to delete {count} documents of {doctype}")]
    DeleteFailed {
        doctype: String,
        count: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
