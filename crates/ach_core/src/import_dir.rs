use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;

use crate::store::DocumentStore;

pub const DEFAULT_IMPORT_DIR: &str = "./DirectoriesToInject";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    /// Path relative to the import root, `/`-separated.
    pub relative_path: String,
    pub name: String,
    pub kind: EntryKind,
    pub absolute_path: PathBuf,
}

impl ImportEntry {
    pub fn parent_relative(&self) -> Option<&str> {
        self.relative_path
            .rsplit_once('/')
            .map(|(parent, _)| parent)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DirImportReport {
    pub directories: usize,
    pub files: usize,
    pub errors: Vec<String>,
}

/// Lists the content of `root` (not `root` itself), parents before
/// children, siblings sorted by name.
pub fn plan_directory(root: &Path) -> Result<Vec<ImportEntry>> {
    if !root.is_dir() {
        bail!("import root is not a directory: {}", root.display());
    }
    let mut entries = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let file_type = entry.file_type();
        let kind = if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            continue;
        };
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} escapes {}", entry.path().display(), root.display()))?;
        entries.push(ImportEntry {
            relative_path: normalize_path(relative),
            name: entry.file_name().to_string_lossy().to_string(),
            kind,
            absolute_path: entry.path().to_path_buf(),
        });
    }
    Ok(entries)
}

/// Recreates the tree under `root` inside the remote directory `parent_id`.
/// Content of a directory that failed to be created is skipped.
pub fn import_directory<S: DocumentStore>(
    store: &mut S,
    root: &Path,
    parent_id: &str,
) -> Result<DirImportReport> {
    let entries = plan_directory(root)?;
    let mut remote_ids: BTreeMap<String, String> = BTreeMap::new();
    let mut report = DirImportReport::default();

    for entry in entries {
        let parent = match entry.parent_relative() {
            None => parent_id.to_string(),
            Some(parent) => match remote_ids.get(parent) {
                Some(id) => id.clone(),
                None => {
                    report
                        .errors
                        .push(format!("{}: parent directory was not created", entry.relative_path));
                    continue;
                }
            },
        };

        let created = match entry.kind {
            EntryKind::Directory => store.create_directory(&parent, &entry.name).map(|id| {
                remote_ids.insert(entry.relative_path.clone(), id);
                report.directories += 1;
            }),
            EntryKind::File => fs::read(&entry.absolute_path)
                .with_context(|| format!("failed to read {}", entry.absolute_path.display()))
                .and_then(|content| {
                    store.upload_file(&parent, &entry.name, content, content_type_for(&entry.name))
                })
                .map(|_| report.files += 1),
        };
        if let Err(error) = created {
            tracing::warn!("failed to import {}: {error:#}", entry.relative_path);
            report
                .errors
                .push(format!("{}: {error:#}", entry.relative_path));
        }
    }

    Ok(report)
}

pub fn content_type_for(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{EntryKind, content_type_for, import_directory, plan_directory};
    use crate::document::ROOT_DIR_ID;
    use crate::test_support::MemoryStore;

    fn write_file(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, content).expect("write");
    }

    #[test]
    fn plan_lists_content_without_root_parents_first() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("inject");
        write_file(&root.join("Bills").join("b.pdf"), "b");
        write_file(&root.join("Bills").join("a.pdf"), "a");
        write_file(&root.join("readme.txt"), "hello");

        let plan = plan_directory(&root).expect("plan");
        let listed = plan
            .iter()
            .map(|entry| (entry.relative_path.as_str(), entry.kind))
            .collect::<Vec<_>>();
        assert_eq!(
            listed,
            vec![
                ("Bills", EntryKind::Directory),
                ("Bills/a.pdf", EntryKind::File),
                ("Bills/b.pdf", EntryKind::File),
                ("readme.txt", EntryKind::File),
            ]
        );
        assert_eq!(plan[1].parent_relative(), Some("Bills"));
        assert_eq!(plan[3].parent_relative(), None);
    }

    #[test]
    fn plan_rejects_missing_root() {
        let temp = tempdir().expect("tempdir");
        let error = plan_directory(&temp.path().join("missing")).expect_err("must fail");
        assert!(error.to_string().contains("not a directory"));
    }

    #[test]
    fn import_creates_directories_before_their_files() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("inject");
        write_file(&root.join("Bills").join("2020").join("jan.pdf"), "jan");
        write_file(&root.join("photo.png"), "png");

        let mut store = MemoryStore::default();
        let report = import_directory(&mut store, &root, ROOT_DIR_ID).expect("import");

        assert_eq!(report.directories, 2);
        assert_eq!(report.files, 2);
        assert!(report.errors.is_empty());
        assert_eq!(
            store.directories,
            vec![
                (ROOT_DIR_ID.to_string(), "Bills".to_string(), "dir-1".to_string()),
                ("dir-1".to_string(), "2020".to_string(), "dir-2".to_string()),
            ]
        );
        assert_eq!(
            store.uploads,
            vec![
                ("dir-2".to_string(), "jan.pdf".to_string(), "application/pdf".to_string()),
                (ROOT_DIR_ID.to_string(), "photo.png".to_string(), "image/png".to_string()),
            ]
        );
    }

    #[test]
    fn failed_directory_skips_its_content() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("inject");
        write_file(&root.join("broken").join("file.txt"), "x");
        write_file(&root.join("ok.txt"), "y");

        let mut store = MemoryStore {
            reject_name: Some("broken".to_string()),
            ..MemoryStore::default()
        };
        let report = import_directory(&mut store, &root, ROOT_DIR_ID).expect("import");
        assert_eq!(report.directories, 0);
        assert_eq!(report.files, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[1].contains("parent directory was not created"));
    }

    #[test]
    fn content_type_falls_back_to_octet_stream() {
        assert_eq!(content_type_for("Scan.PDF"), "application/pdf");
        assert_eq!(content_type_for("archive.tar.gz"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
