use std::collections::HashSet;

use anyhow::Result;

use crate::document::{
    Account, Bill, DOCTYPE_ACCOUNTS, DOCTYPE_BILLS, DOCTYPE_FILES, Document, RemovalRecord,
};
use crate::duplicates::group_duplicates;
use crate::error::ReconcileError;
use crate::orphans::partition_orphans;
use crate::store::DocumentStore;

/// Fields two bills must share to be considered duplicates.
pub const BILL_KEY_FIELDS: &[&str] = &["date", "amount", "vendor"];

/// Doctypes a token needs to run the duplicate-bill cleanup.
pub const REQUIRED_DOCTYPES: &[&str] = &[DOCTYPE_BILLS, DOCTYPE_FILES, DOCTYPE_ACCOUNTS];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    /// Connector slug matched against `account_type`.
    pub vendor_slug: String,
    /// Vendor name matched against the bills' `vendor` field, case-sensitive.
    pub vendor_name: String,
    pub dry_run: bool,
}

impl ReconcileRequest {
    fn validate(&self) -> Result<(), ReconcileError> {
        if self.vendor_slug.trim().is_empty() {
            return Err(ReconcileError::InvalidConfiguration(
                "vendor slug is required".to_string(),
            ));
        }
        if self.vendor_name.trim().is_empty() {
            return Err(ReconcileError::InvalidConfiguration(
                "vendor name is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bills to keep and bills to delete. Every vendor bill is in exactly one side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    pub keep: Vec<Document>,
    pub remove: Vec<RemovalRecord>,
}

impl ReconciliationPlan {
    pub fn removal_documents(&self) -> Vec<Document> {
        self.remove
            .iter()
            .map(|record| record.document.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub matching_accounts: usize,
    pub skipped_accounts: Vec<String>,
    pub live_files: usize,
    pub fetched_bills: usize,
    pub vendor_bills: usize,
    pub orphaned: usize,
    pub duplicates: usize,
    pub to_remove: usize,
    pub kept: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub summary: PlanSummary,
    pub plan: ReconciliationPlan,
    /// True only when the deletion was actually sent to the store.
    pub applied: bool,
}

/// Computes the removal plan for one vendor's bills and, unless dry-run,
/// deletes the planned bills in a single batch.
///
/// `on_plan` receives the summary before any deletion happens, with the
/// same content in dry-run and live mode. Failing to fetch accounts or bills
/// aborts the run; an account whose folder cannot be resolved is skipped.
pub fn reconcile_vendor_bills<S: DocumentStore>(
    store: &mut S,
    request: &ReconcileRequest,
    mut on_plan: impl FnMut(&PlanSummary),
) -> Result<ReconcileOutcome> {
    request.validate()?;

    let accounts = store
        .fetch_all(DOCTYPE_ACCOUNTS)
        .map_err(|source| ReconcileError::FetchFailed {
            doctype: DOCTYPE_ACCOUNTS.to_string(),
            source: source.into(),
        })?;
    let accounts = accounts
        .iter()
        .filter(|document| {
            Account::new(document).account_type() == Some(request.vendor_slug.as_str())
        })
        .collect::<Vec<_>>();
    tracing::info!(
        slug = request.vendor_slug.as_str(),
        accounts = accounts.len(),
        "resolving account folders"
    );

    let mut live_file_ids = HashSet::new();
    let mut skipped_accounts = Vec::new();
    for document in &accounts {
        let account = Account::new(document);
        let Some(folder_path) = account.folder_path() else {
            continue;
        };
        match store.stat_by_path(folder_path) {
            Ok(folder) => {
                tracing::debug!(
                    folder = folder.id.as_str(),
                    files = folder.children.len(),
                    "resolved {folder_path}"
                );
                live_file_ids.extend(folder.children);
            }
            Err(error) => {
                tracing::warn!(
                    account = account.id().unwrap_or("<no id>"),
                    "{folder_path} does not exist: {error:#}"
                );
                skipped_accounts.push(folder_path.to_string());
            }
        }
    }

    let bills = store
        .fetch_all(DOCTYPE_BILLS)
        .map_err(|source| ReconcileError::FetchFailed {
            doctype: DOCTYPE_BILLS.to_string(),
            source: source.into(),
        })?;
    let fetched_bills = bills.len();
    let vendor_bills = bills
        .into_iter()
        .filter(|document| Bill::new(document).vendor() == Some(request.vendor_name.as_str()))
        .collect::<Vec<_>>();

    let partition = partition_orphans(&vendor_bills, &live_file_ids);
    tracing::info!(
        orphaned = partition.orphaned.len(),
        "found bills whose files no longer exist"
    );

    let groups = group_duplicates(&partition.valid, BILL_KEY_FIELDS)?;
    let duplicates = groups.remove.len();
    let orphaned = partition.orphaned.len();

    let mut remove = groups.remove;
    remove.extend(partition.orphaned.into_iter().map(RemovalRecord::orphaned));
    let plan = ReconciliationPlan {
        keep: groups.keep,
        remove,
    };

    let summary = PlanSummary {
        matching_accounts: accounts.len(),
        skipped_accounts,
        live_files: live_file_ids.len(),
        fetched_bills,
        vendor_bills: vendor_bills.len(),
        orphaned,
        duplicates,
        to_remove: plan.remove.len(),
        kept: plan.keep.len(),
        dry_run: request.dry_run,
    };
    on_plan(&summary);

    if request.dry_run || plan.remove.is_empty() {
        return Ok(ReconcileOutcome {
            summary,
            plan,
            applied: false,
        });
    }

    let removal = plan.removal_documents();
    store
        .delete_all(DOCTYPE_BILLS, &removal)
        .map_err(|source| ReconcileError::DeleteFailed {
            doctype: DOCTYPE_BILLS.to_string(),
            count: removal.len(),
            source: source.into(),
        })?;
    tracing::info!(deleted = removal.len(), "deleted bills");

    Ok(ReconcileOutcome {
        summary,
        plan,
        applied: true,
    })
}
