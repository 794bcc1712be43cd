use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use gdrive_core::{DriveEntry, DriveError};
use thiserror::Error;

use super::context::RunContext;
use super::engine::{Uploader, now_ts};
use super::hash::md5_of_file;
use super::index::{FileRecord, FolderRecord, IndexError};
use super::paths;

pub(crate) const MAX_ATTEMPTS: u32 = 3;

/// Terminal per-run outcome of one file reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileStatus {
    Skipped,
    Synced,
    Different,
    ToUpload,
    Uploaded,
    Failed,
    Cancelled,
}

impl FileStatus {
    fn as_str(self) -> &'static str {
        match self {
            FileStatus::Skipped => "skipped",
            FileStatus::Synced => "synced",
            FileStatus::Different => "different",
            FileStatus::ToUpload => "to upload",
            FileStatus::Uploaded => "uploaded",
            FileStatus::Failed => "failed",
            FileStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
enum FileError {
    #[error("drive api error: {0}")]
    Drive(#[from] DriveError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("folder carries no remote id while uploading {0}")]
    MissingFolderHandle(String),
}

impl FileError {
    fn is_cancellation(&self) -> bool {
        matches!(self, FileError::Drive(DriveError::Cancelled))
    }
}

impl Uploader {
    /// Reconciles one local file against its index record and the folder's
    /// already-fetched remote entry, under the file gate. Up to three
    /// attempts; the hash is recomputed on every attempt.
    pub(crate) async fn sync_file(
        &self,
        source: &Path,
        name: &str,
        folder: &FolderRecord,
        remote: &HashMap<String, DriveEntry>,
        ctx: &RunContext,
    ) -> FileStatus {
        let Ok(_permit) = ctx.file_gate.acquire().await else {
            return FileStatus::Cancelled;
        };
        let started = Instant::now();
        let rel = paths::child_key(&folder.rel_path, name);
        let remote_entry = remote.get(&name.to_lowercase());
        let mut record = folder.files.get(&rel).cloned();

        let already_uploaded = record.as_ref().is_some_and(|r| r.gdrive_id.is_some());
        let status = if ctx.remains_only && already_uploaded {
            // Resume shortcut: no hashing, no network.
            FileStatus::Skipped
        } else {
            let mut status = FileStatus::Failed;
            for attempt in 1..=MAX_ATTEMPTS {
                if ctx.is_cancelled() {
                    return FileStatus::Cancelled;
                }
                match self
                    .file_attempt(source, name, &rel, folder, remote_entry, &mut record, ctx)
                    .await
                {
                    Ok(outcome) => {
                        status = outcome;
                        break;
                    }
                    Err(err) if err.is_cancellation() => return FileStatus::Cancelled,
                    Err(err) => {
                        eprintln!(
                            "[gdriveup] warning: {rel} attempt {attempt} failed after {:?}: {err}",
                            started.elapsed()
                        );
                        if let Some(wait) = self.retry.wait_after(attempt) {
                            tokio::time::sleep(wait).await;
                        }
                    }
                }
            }
            status
        };

        if matches!(status, FileStatus::Different | FileStatus::Failed) {
            ctx.record_failed_file();
        }
        eprintln!(
            "[gdriveup] {rel} {} in {:?}",
            status.as_str(),
            started.elapsed()
        );
        status
    }

    async fn file_attempt(
        &self,
        source: &Path,
        name: &str,
        rel: &str,
        folder: &FolderRecord,
        remote_entry: Option<&DriveEntry>,
        record: &mut Option<FileRecord>,
        ctx: &RunContext,
    ) -> Result<FileStatus, FileError> {
        // Recomputed per attempt: the file may change between retries.
        let md5 = md5_of_file(source).await?;
        let size = tokio::fs::metadata(source).await?.len();

        // The record is created at most once per run, independent of whether
        // any upload succeeds afterwards.
        if record.is_none() && !ctx.estimate_only {
            let fresh = FileRecord {
                rel_path: rel.to_string(),
                folder_path: folder.rel_path.clone(),
                md5: md5.clone(),
                size: size as i64,
                gdrive_id: None,
                seen_at: now_ts(),
                uploaded_at: None,
            };
            self.index.insert_file(&fresh).await?;
            *record = Some(fresh);
        }

        if let Some(entry) = remote_entry {
            let remote_md5 = entry.md5_checksum.as_deref().unwrap_or_default();
            if !remote_md5.eq_ignore_ascii_case(&md5) {
                // Divergent content is surfaced for manual resolution and
                // never overwritten.
                eprintln!(
                    "[gdriveup] warning: {rel} differs from its remote copy (local {md5}, remote {remote_md5})"
                );
                return Ok(FileStatus::Different);
            }
            if record.as_ref().is_some_and(|r| r.gdrive_id.is_some()) {
                return Ok(FileStatus::Skipped);
            }
            // Same content already present remotely: adopt its id without a
            // transfer.
            if !ctx.estimate_only
                && let Some(rec) = record.as_mut()
            {
                rec.gdrive_id = Some(entry.id.clone());
                rec.md5 = md5;
                rec.size = size as i64;
                rec.uploaded_at = Some(now_ts());
                self.index.update_file(rec).await?;
            }
            return Ok(FileStatus::Synced);
        }

        if ctx.estimate_only {
            ctx.add_bytes(size);
            return Ok(FileStatus::ToUpload);
        }

        let folder_id = folder
            .gdrive_id
            .as_deref()
            .ok_or_else(|| FileError::MissingFolderHandle(rel.to_string()))?;
        let uploaded = {
            let _permit = ctx
                .upload_gate
                .acquire()
                .await
                .map_err(|_| FileError::Drive(DriveError::Cancelled))?;
            self.client
                .upload_file(folder_id, name, source, &ctx.cancel)
                .await?
        };
        if let Some(rec) = record.as_mut() {
            rec.gdrive_id = Some(uploaded.id.clone());
            rec.md5 = md5;
            rec.size = size as i64;
            rec.uploaded_at = Some(now_ts());
            self.index.update_file(rec).await?;
        }
        ctx.add_bytes(size);
        Ok(FileStatus::Uploaded)
    }
}
