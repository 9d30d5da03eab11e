//! Filesystem document loader.
//!
//! Walks the configured data directory, applies include/exclude globs, and
//! extracts text from every supported file. Files that fail extraction are
//! skipped with a warning rather than aborting the scan.

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::IndexConfig;
use crate::extract::{extract_text, DocumentFormat};
use crate::models::DocumentRecord;

pub fn scan_documents(config: &IndexConfig) -> Result<Vec<DocumentRecord>> {
    let root = &config.data_dir;
    if !root.exists() {
        bail!("Data directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut records = Vec::new();

    let walker = WalkDir::new(root).follow_links(config.follow_symlinks);
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }

        let format = match DocumentFormat::from_path(path) {
            Some(format) => format,
            None => continue,
        };

        match load_record(path, &rel_str, format) {
            Ok(record) => records.push(record),
            Err(e) => {
                eprintln!("warning: skipping {}: {}", rel_str, e);
            }
        }
    }

    // Deterministic ordering by relative path.
    records.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(records)
}

fn load_record(path: &Path, relative_path: &str, format: DocumentFormat) -> Result<DocumentRecord> {
    let metadata = std::fs::metadata(path)?;
    let modified_secs = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let bytes = std::fs::read(path)?;
    let text = extract_text(&bytes, format)?;

    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    let source_file = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| relative_path.to_string());

    Ok(DocumentRecord {
        id: relative_path.to_string(),
        text,
        source_file,
        modified: Utc
            .timestamp_opt(modified_secs, 0)
            .single()
            .unwrap_or_else(Utc::now),
        content_hash,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(root: &Path) -> IndexConfig {
        IndexConfig {
            data_dir: root.to_path_buf(),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: vec!["**/.gitkeep".to_string()],
            follow_symlinks: false,
        }
    }

    #[test]
    fn scans_matching_files_in_order() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("beta.md"), "Beta doc.").unwrap();
        fs::write(tmp.path().join("alpha.txt"), "Alpha doc.").unwrap();
        fs::write(tmp.path().join("notes.rst"), "not indexed").unwrap();
        fs::write(tmp.path().join(".gitkeep"), "").unwrap();

        let records = scan_documents(&config_for(tmp.path())).unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha.txt", "beta.md"]);
        assert_eq!(records[0].text, "Alpha doc.");
        assert_eq!(records[0].source_file, "alpha.txt");
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        assert!(scan_documents(&config_for(&missing)).is_err());
    }

    #[test]
    fn nested_files_keep_relative_id_and_bare_source_name() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/deep.md"), "Nested doc.").unwrap();

        let records = scan_documents(&config_for(tmp.path())).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].id.ends_with("deep.md"));
        assert!(records[0].id.contains("sub"));
        assert_eq!(records[0].source_file, "deep.md");
    }

    #[test]
    fn identical_content_yields_identical_hash() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("one.txt"), "Same words.").unwrap();
        fs::write(tmp.path().join("two.txt"), "Same words.").unwrap();

        let records = scan_documents(&config_for(tmp.path())).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].content_hash, records[1].content_hash);
    }
}
