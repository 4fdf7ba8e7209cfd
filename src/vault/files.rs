//! Attachment storage with collision-proof naming.
//!
//! Placement policy: direct save under the original (sanitized) name when
//! free; on collision, a subdirectory named from the file's creation
//! timestamp (then its remote id, then the current epoch); on residual
//! collision inside the subdirectory, an incrementing numeric prefix.
//! Bytes land in a temp file first and are renamed into place, so a killed
//! process never leaves a partial file at a final path.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::logging;
use crate::slack::types::FileRef;
use crate::vault::util::now_epoch_secs;

/// Byte-fetching seam between the downloader and the HTTP client, so the
/// placement policy is testable without a network.
pub trait FileFetcher {
    fn fetch_bytes(&self, url: &str, authenticated: bool) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub saved_path: String,
    pub original_name: String,
    pub dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadIndexEntry {
    pub filepath: String,
    pub raw_ts: String,
    pub actual_ts: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permalink_public: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOutcome {
    pub saved: usize,
    pub skipped: usize,
}

pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

fn display_name(file: &FileRef) -> String {
    file.name
        .clone()
        .filter(|n| !n.is_empty())
        .or_else(|| file.id.clone().filter(|i| !i.is_empty()))
        .unwrap_or_else(|| "file".to_string())
}

fn collision_subdir_name(file: &FileRef) -> Result<String> {
    let key = if let Some(created) = file.created {
        created.to_string()
    } else if let Some(ts) = file.timestamp {
        ts.to_string()
    } else if let Some(id) = file.id.clone().filter(|i| !i.is_empty()) {
        id
    } else {
        now_epoch_secs()?.to_string()
    };
    Ok(key.replace('.', "_"))
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() || name.starts_with('.') => (stem, ext),
        _ => (name, ""),
    }
}

/// Work through a channel's new-file work-list. Failures are logged and
/// skipped; only local I/O errors propagate.
pub fn download_all(
    fetcher: &dyn FileFetcher,
    channel_dir: &Path,
    files_dir: &Path,
    files: &[FileRef],
    dry_run: bool,
) -> Result<DownloadOutcome> {
    let mut outcome = DownloadOutcome::default();
    for file in files {
        if dry_run {
            logging::info(
                "dry_run_skip_download",
                &[("name", display_name(file)), ("dir", files_dir.display().to_string())],
            );
            continue;
        }
        match download_file(fetcher, channel_dir, files_dir, file)? {
            Some(_) => outcome.saved += 1,
            None => outcome.skipped += 1,
        }
    }
    Ok(outcome)
}

/// Fetch one file and store it under the collision policy. `Ok(None)` means
/// the file was skipped (missing URL or failed fetch) without aborting the
/// channel.
pub fn download_file(
    fetcher: &dyn FileFetcher,
    channel_dir: &Path,
    files_dir: &Path,
    file: &FileRef,
) -> Result<Option<PathBuf>> {
    fs::create_dir_all(files_dir)
        .with_context(|| format!("failed to create {}", files_dir.display()))?;

    let Some(url) = file.url_private.as_deref() else {
        logging::warn(
            "file_missing_url",
            &[("name", display_name(file)), ("dir", files_dir.display().to_string())],
        );
        return Ok(None);
    };

    let bytes = match fetcher.fetch_bytes(url, true) {
        Ok(bytes) => bytes,
        Err(err) => {
            logging::error(
                "file_fetch_failed",
                &[("name", display_name(file)), ("reason", format!("{err:#}"))],
            );
            return Ok(None);
        }
    };

    let final_path = store_bytes(files_dir, file, &bytes)?;
    record_manifest_entry(channel_dir, files_dir, file, &final_path);
    record_index_entry(channel_dir, file, &final_path);
    logging::info(
        "file_downloaded",
        &[("path", final_path.display().to_string())],
    );
    Ok(Some(final_path))
}

/// Resolve a collision-free path and write `bytes` there atomically.
pub fn store_bytes(files_dir: &Path, file: &FileRef, bytes: &[u8]) -> Result<PathBuf> {
    let safe_name = sanitize_file_name(&display_name(file));
    let direct = files_dir.join(&safe_name);

    let (target_dir, final_path) = if !direct.exists() {
        (files_dir.to_path_buf(), direct)
    } else {
        let subdir = files_dir.join(collision_subdir_name(file)?);
        fs::create_dir_all(&subdir)
            .with_context(|| format!("failed to create {}", subdir.display()))?;
        let mut candidate = subdir.join(&safe_name);
        if candidate.exists() {
            let (stem, ext) = split_name(&safe_name);
            let mut i = 1usize;
            loop {
                let numbered = if ext.is_empty() {
                    subdir.join(format!("{i}_{stem}"))
                } else {
                    subdir.join(format!("{i}_{stem}.{ext}"))
                };
                if !numbered.exists() {
                    candidate = numbered;
                    break;
                }
                i += 1;
            }
        }
        (subdir, candidate)
    };

    let mut tmp = tempfile::NamedTempFile::new_in(&target_dir)
        .with_context(|| format!("failed to create temp file in {}", target_dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("failed to write temp file in {}", target_dir.display()))?;
    tmp.persist(&final_path)
        .with_context(|| format!("failed to move download into {}", final_path.display()))?;
    Ok(final_path)
}

fn record_manifest_entry(channel_dir: &Path, files_dir: &Path, file: &FileRef, final_path: &Path) {
    if let Err(err) = append_manifest(channel_dir, files_dir, file, final_path) {
        // never allowed to fail the download it describes
        logging::warn(
            "manifest_update_failed",
            &[("path", final_path.display().to_string()), ("reason", format!("{err:#}"))],
        );
    }
}

fn append_manifest(
    channel_dir: &Path,
    files_dir: &Path,
    file: &FileRef,
    final_path: &Path,
) -> Result<()> {
    let path = channel_dir.join("manifest.json");
    let mut manifest: BTreeMap<String, ManifestEntry> = if path.exists() {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        BTreeMap::new()
    };

    let safe_name = sanitize_file_name(&display_name(file));
    let key = file
        .id
        .clone()
        .filter(|i| !i.is_empty())
        .unwrap_or(safe_name);
    let saved_path = final_path
        .strip_prefix(files_dir)
        .unwrap_or(final_path)
        .display()
        .to_string();
    let dir = match final_path.parent().and_then(|p| p.strip_prefix(files_dir).ok()) {
        Some(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Some(rel) => rel.display().to_string(),
        None => ".".to_string(),
    };

    manifest.insert(
        key,
        ManifestEntry {
            saved_path,
            original_name: display_name(file),
            dir,
            ts: file.created.or(file.timestamp),
        },
    );

    let data = serde_json::to_string_pretty(&manifest)?;
    fs::write(&path, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn record_index_entry(channel_dir: &Path, file: &FileRef, final_path: &Path) {
    if let Err(err) = append_download_index(channel_dir, file, final_path) {
        logging::warn(
            "index_update_failed",
            &[("path", final_path.display().to_string()), ("reason", format!("{err:#}"))],
        );
    }
}

fn index_timestamps(file: &FileRef) -> Result<(String, String)> {
    if let Some(created) = file.created {
        return Ok((created.to_string(), format!("{created}.000000")));
    }
    if let Some(ts) = file.timestamp {
        return Ok((ts.to_string(), ts.to_string()));
    }
    let now = now_epoch_secs()?;
    Ok((now.to_string(), format!("{now}.000000")))
}

fn append_download_index(channel_dir: &Path, file: &FileRef, final_path: &Path) -> Result<()> {
    let path = channel_dir.join("downloaded_files.json");
    let mut entries: Vec<DownloadIndexEntry> = if path.exists() {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        // a damaged index restarts empty rather than blocking downloads
        serde_json::from_str(&raw).unwrap_or_default()
    } else {
        Vec::new()
    };

    let (raw_ts, actual_ts) = index_timestamps(file)?;
    let filepath = final_path
        .strip_prefix(channel_dir)
        .unwrap_or(final_path)
        .display()
        .to_string();
    entries.push(DownloadIndexEntry {
        filepath,
        raw_ts,
        actual_ts,
        permalink: file.permalink.clone(),
        permalink_public: file.url.clone(),
    });

    let data = serde_json::to_string_pretty(&entries)?;
    fs::write(&path, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn file_ref(name: &str, created: Option<i64>) -> FileRef {
        let mut value = json!({"id": "F001", "name": name, "url_private": "https://x/f"});
        if let Some(created) = created {
            value["created"] = json!(created);
        }
        serde_json::from_value(value).expect("file ref")
    }

    #[test]
    fn sanitize_replaces_illegal_characters() {
        assert_eq!(sanitize_file_name(r#"a/b\c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
    }

    #[test]
    fn first_file_saves_directly() {
        let tmp = tempdir().expect("tempdir");
        let files_dir = tmp.path().join("files");

        let path = store_bytes(&files_dir, &file_ref("report.pdf", Some(1700000001)), b"one")
            .expect("store");
        assert_eq!(path, files_dir.join("report.pdf"));
        assert_eq!(fs::read(&path).expect("read"), b"one");
    }

    #[test]
    fn colliding_file_lands_in_timestamp_subdir() {
        let tmp = tempdir().expect("tempdir");
        let files_dir = tmp.path().join("files");

        let first = store_bytes(&files_dir, &file_ref("report.pdf", Some(1700000001)), b"one")
            .expect("store first");
        let second = store_bytes(&files_dir, &file_ref("report.pdf", Some(1700000002)), b"two")
            .expect("store second");

        assert_eq!(second, files_dir.join("1700000002").join("report.pdf"));
        assert_eq!(fs::read(&first).expect("read first"), b"one");
        assert_eq!(fs::read(&second).expect("read second"), b"two");
    }

    #[test]
    fn residual_collision_gets_numeric_prefix() {
        let tmp = tempdir().expect("tempdir");
        let files_dir = tmp.path().join("files");
        let same_moment = file_ref("report.pdf", Some(1700000002));

        store_bytes(&files_dir, &same_moment, b"one").expect("store first");
        store_bytes(&files_dir, &same_moment, b"two").expect("store second");
        let third = store_bytes(&files_dir, &same_moment, b"three").expect("store third");

        assert_eq!(third, files_dir.join("1700000002").join("1_report.pdf"));
        assert_eq!(fs::read(&third).expect("read"), b"three");
    }

    #[test]
    fn subdir_falls_back_to_id_without_timestamps() {
        let file: FileRef =
            serde_json::from_value(json!({"id": "F0XYZ", "name": "pic.png"})).expect("file ref");
        assert_eq!(collision_subdir_name(&file).expect("name"), "F0XYZ");
    }

    #[test]
    fn manifest_and_index_record_the_stored_file() {
        let tmp = tempdir().expect("tempdir");
        let channel_dir = tmp.path().join("general");
        let files_dir = channel_dir.join("files");
        fs::create_dir_all(&files_dir).expect("mkdir");

        let file = file_ref("report.pdf", Some(1700000001));
        let final_path = store_bytes(&files_dir, &file, b"bytes").expect("store");
        record_manifest_entry(&channel_dir, &files_dir, &file, &final_path);
        record_index_entry(&channel_dir, &file, &final_path);

        let manifest: BTreeMap<String, ManifestEntry> = serde_json::from_str(
            &fs::read_to_string(channel_dir.join("manifest.json")).expect("read manifest"),
        )
        .expect("parse manifest");
        let entry = manifest.get("F001").expect("entry");
        assert_eq!(entry.saved_path, "report.pdf");
        assert_eq!(entry.dir, ".");
        assert_eq!(entry.ts, Some(1700000001));

        let index: Vec<DownloadIndexEntry> = serde_json::from_str(
            &fs::read_to_string(channel_dir.join("downloaded_files.json")).expect("read index"),
        )
        .expect("parse index");
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].raw_ts, "1700000001");
        assert_eq!(index[0].actual_ts, "1700000001.000000");
        assert_eq!(index[0].filepath, "files/report.pdf");
    }

    #[test]
    fn missing_url_is_skipped_not_fatal() {
        struct NoFetch;
        impl FileFetcher for NoFetch {
            fn fetch_bytes(&self, _url: &str, _authenticated: bool) -> Result<Vec<u8>> {
                unreachable!("must not be called without a url")
            }
        }

        let tmp = tempdir().expect("tempdir");
        let channel_dir = tmp.path().join("general");
        let file: FileRef =
            serde_json::from_value(json!({"id": "F002", "name": "ghost.txt"})).expect("file ref");

        let got = download_file(&NoFetch, &channel_dir, &channel_dir.join("files"), &file)
            .expect("download");
        assert!(got.is_none());
    }

    #[test]
    fn fetch_failure_is_skipped_not_fatal() {
        struct FailFetch;
        impl FileFetcher for FailFetch {
            fn fetch_bytes(&self, _url: &str, _authenticated: bool) -> Result<Vec<u8>> {
                anyhow::bail!("http status 404")
            }
        }

        let tmp = tempdir().expect("tempdir");
        let channel_dir = tmp.path().join("general");
        let file = file_ref("gone.pdf", None);

        let got = download_file(&FailFetch, &channel_dir, &channel_dir.join("files"), &file)
            .expect("download");
        assert!(got.is_none());
        assert!(!channel_dir.join("files").join("gone.pdf").exists());
    }

    #[test]
    fn dry_run_logs_intent_without_fetching_or_writing() {
        struct PanicFetch;
        impl FileFetcher for PanicFetch {
            fn fetch_bytes(&self, _url: &str, _authenticated: bool) -> Result<Vec<u8>> {
                unreachable!("dry run must not fetch attachments")
            }
        }

        let tmp = tempdir().expect("tempdir");
        let channel_dir = tmp.path().join("general");
        let files_dir = channel_dir.join("files");
        let work_list = vec![file_ref("report.pdf", Some(1700000001))];

        let outcome =
            download_all(&PanicFetch, &channel_dir, &files_dir, &work_list, true).expect("dry run");
        assert_eq!(outcome.saved, 0);
        assert_eq!(outcome.skipped, 0);
        assert!(!channel_dir.exists());
    }

    #[test]
    fn split_name_keeps_compound_extensions_sane() {
        assert_eq!(split_name("a.tar.gz"), ("a.tar", "gz"));
        assert_eq!(split_name("noext"), ("noext", ""));
        assert_eq!(split_name(".bashrc"), ("", "bashrc"));
    }
}
