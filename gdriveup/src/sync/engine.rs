use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use gdrive_core::{DriveClient, DriveEntry, DriveError, FOLDER_MIME_TYPE};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::context::RunContext;
use super::file::MAX_ATTEMPTS;
use super::folder::FolderTarget;
use super::index::{IndexError, IndexStore};
use super::paths;
use super::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("source directory is unavailable: {0}")]
    SourceUnavailable(io::Error),
    #[error("base directory is unavailable: {0}")]
    BaseUnavailable(io::Error),
    #[error("source {} is not inside base {}", source_dir.display(), base.display())]
    SourceOutsideBase { source_dir: PathBuf, base: PathBuf },
    #[error("drive api error: {0}")]
    Drive(#[from] DriveError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

pub struct CopyOptions {
    /// Identity keys are computed relative to this directory; defaults to the
    /// source directory itself.
    pub base_dir: Option<PathBuf>,
    /// Skip any path already marked uploaded, without re-hashing.
    pub remains_only: bool,
    /// Dry run: count pending bytes, no transfers, no index writes.
    pub estimate_only: bool,
    pub file_concurrency: usize,
    pub upload_concurrency: usize,
    pub cancel: CancellationToken,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            base_dir: None,
            remains_only: false,
            estimate_only: false,
            file_concurrency: default_file_concurrency(),
            upload_concurrency: 2,
            cancel: CancellationToken::new(),
        }
    }
}

pub fn default_file_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 4)
        .unwrap_or(16)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyReport {
    pub failed_folders: u64,
    pub failed_files: u64,
    pub bytes_uploaded: u64,
    pub cancelled: bool,
}

pub struct Uploader {
    pub(crate) client: DriveClient,
    pub(crate) index: IndexStore,
    pub(crate) retry: RetryPolicy,
}

impl Uploader {
    pub fn new(client: DriveClient, index: IndexStore) -> Self {
        Self {
            client,
            index,
            retry: RetryPolicy::new(
                Duration::from_millis(250),
                Duration::from_secs(10),
                MAX_ATTEMPTS,
                true,
            ),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Mirrors `source_dir` into the remote folder at `target_path`,
    /// uploading only content that is not already present. Individual file
    /// and folder failures are absorbed into the report; only the fast-fail
    /// validations and remote target resolution can error here.
    pub async fn copy(
        &self,
        source_dir: &Path,
        target_path: &str,
        options: CopyOptions,
    ) -> Result<CopyReport, CopyError> {
        let base = options
            .base_dir
            .clone()
            .unwrap_or_else(|| source_dir.to_path_buf());
        let base = std::fs::canonicalize(&base).map_err(CopyError::BaseUnavailable)?;
        let source = if source_dir.is_absolute() {
            source_dir.to_path_buf()
        } else {
            base.join(source_dir)
        };
        let source = std::fs::canonicalize(&source).map_err(CopyError::SourceUnavailable)?;
        if !source.is_dir() {
            return Err(CopyError::SourceUnavailable(io::Error::new(
                io::ErrorKind::InvalidInput,
                "source is not a directory",
            )));
        }
        let root_key = paths::rel_from_base(&base, &source).ok_or_else(|| {
            CopyError::SourceOutsideBase {
                source_dir: source.clone(),
                base: base.clone(),
            }
        })?;

        eprintln!(
            "[gdriveup] copying {} -> {} (base {})",
            source.display(),
            target_path,
            base.display()
        );
        let target = self
            .resolve_target(target_path, options.estimate_only)
            .await?;

        let ctx = Arc::new(RunContext::new(
            options.remains_only,
            options.estimate_only,
            options.file_concurrency,
            options.upload_concurrency,
            options.cancel,
        ));
        let root_target = match target {
            Some(entry) => FolderTarget::Resolved(entry),
            None => FolderTarget::Under(None),
        };
        self.run_folder(source, root_key, root_target, Arc::clone(&ctx))
            .await;

        let stats = ctx.stats();
        let report = CopyReport {
            failed_folders: stats.failed_folders,
            failed_files: stats.failed_files,
            bytes_uploaded: stats.bytes_uploaded,
            cancelled: ctx.is_cancelled(),
        };
        if report.cancelled {
            eprintln!("[gdriveup] run cancelled");
        }
        let verb = if options.estimate_only {
            "to upload"
        } else {
            "uploaded"
        };
        if report.failed_folders > 0 || report.failed_files > 0 {
            eprintln!(
                "[gdriveup] warning: finished with {} failed folders, {} failed files, {} {}",
                report.failed_folders,
                report.failed_files,
                format_size(report.bytes_uploaded),
                verb
            );
        } else {
            eprintln!(
                "[gdriveup] finished: {} {}, no failures",
                format_size(report.bytes_uploaded),
                verb
            );
        }
        Ok(report)
    }

    /// Resolves the remote target path segment by segment, rooted at the
    /// Drive root alias. In estimate mode the walk is lookup-only; a missing
    /// segment means nothing below the target exists yet.
    async fn resolve_target(
        &self,
        target_path: &str,
        estimate_only: bool,
    ) -> Result<Option<DriveEntry>, DriveError> {
        let mut entry = drive_root();
        for segment in target_path
            .split(['/', '\\'])
            .filter(|segment| !segment.trim().is_empty())
        {
            if estimate_only {
                match self.client.find_folder(&entry.id, segment).await? {
                    Some(found) => entry = found,
                    None => return Ok(None),
                }
            } else {
                entry = self.client.ensure_folder_created(&entry.id, segment).await?;
            }
        }
        Ok(Some(entry))
    }
}

fn drive_root() -> DriveEntry {
    DriveEntry {
        id: "root".to_string(),
        name: String::new(),
        mime_type: FOLDER_MIME_TYPE.to_string(),
        md5_checksum: None,
        size: None,
    }
}

pub(crate) fn now_ts() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut len = bytes as f64;
    let mut order = 0;
    while len >= 1024.0 && order < UNITS.len() - 1 {
        order += 1;
        len /= 1024.0;
    }
    if order == 0 {
        return format!("{bytes}B");
    }
    let mut text = format!("{len:.2}");
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    format!("{text}{}", UNITS[order])
}
