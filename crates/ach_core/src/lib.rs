pub mod admin;
pub mod collections;
pub mod config;
pub mod document;
pub mod duplicates;
pub mod error;
pub mod fixtures;
pub mod import_dir;
pub mod keys;
pub mod orphans;
pub mod reconcile;
pub mod store;
pub mod tunnel;

#[cfg(test)]
mod test_support;
