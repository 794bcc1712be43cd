use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use gdrive_core::{DriveEntry, DriveError};
use thiserror::Error;

use super::context::RunContext;
use super::engine::{Uploader, now_ts};
use super::index::{FolderRecord, IndexError};
use super::paths;

#[derive(Debug, Error)]
pub(crate) enum FolderError {
    #[error("drive api error: {0}")]
    Drive(#[from] DriveError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("remote folder id changed for {rel}: index holds {stored}, remote resolved to {resolved}")]
    RemoteIdMismatch {
        rel: String,
        stored: String,
        resolved: String,
    },
}

impl FolderError {
    fn is_cancellation(&self) -> bool {
        matches!(self, FolderError::Drive(DriveError::Cancelled))
    }
}

/// How a folder job finds its remote counterpart: the orchestrator hands the
/// root a pre-resolved handle; children resolve themselves under their
/// parent's id. `Under(None)` occurs only in estimate mode, when an ancestor
/// does not exist remotely yet.
pub(crate) enum FolderTarget {
    Resolved(DriveEntry),
    Under(Option<String>),
}

struct LocalChild {
    name: String,
    path: PathBuf,
}

impl Uploader {
    /// Reconciles one directory and recurses into its children. Failures are
    /// absorbed here: the folder is counted and logged, siblings keep going.
    pub(crate) fn run_folder(
        &self,
        dir: PathBuf,
        rel: String,
        target: FolderTarget,
        ctx: Arc<RunContext>,
    ) -> BoxFuture<'_, ()> {
        async move {
            if ctx.is_cancelled() {
                return;
            }
            let started = Instant::now();
            if let Err(err) = self.sync_folder(&dir, &rel, target, &ctx).await {
                if err.is_cancellation() || ctx.is_cancelled() {
                    return;
                }
                ctx.record_failed_folder();
                eprintln!(
                    "[gdriveup] warning: folder {rel} failed after {:?}: {err}",
                    started.elapsed()
                );
            }
        }
        .boxed()
    }

    async fn sync_folder(
        &self,
        dir: &Path,
        rel: &str,
        target: FolderTarget,
        ctx: &Arc<RunContext>,
    ) -> Result<(), FolderError> {
        let mut record = match self.index.get_folder(rel).await? {
            Some(record) => record,
            None => {
                let record = FolderRecord::new(rel, now_ts());
                if !ctx.estimate_only {
                    self.index.insert_folder(&record).await?;
                }
                record
            }
        };

        let target = match target {
            FolderTarget::Resolved(entry) => Some(entry),
            FolderTarget::Under(None) => None,
            FolderTarget::Under(Some(parent_id)) => {
                let name = dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if ctx.estimate_only {
                    self.client.find_folder(&parent_id, &name).await?
                } else {
                    Some(self.client.ensure_folder_created(&parent_id, &name).await?)
                }
            }
        };

        if let Some(entry) = &target {
            match record.gdrive_id.as_deref() {
                Some(stored) if stored != entry.id => {
                    return Err(FolderError::RemoteIdMismatch {
                        rel: rel.to_string(),
                        stored: stored.to_string(),
                        resolved: entry.id.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    record.gdrive_id = Some(entry.id.clone());
                    record.uploaded_at = Some(now_ts());
                    if !ctx.estimate_only {
                        self.index.update_folder(&record).await?;
                    }
                }
            }
        }

        if ctx.is_cancelled() {
            return Ok(());
        }

        // One listing per folder; duplicate sibling names keep the first
        // entry observed and are surfaced as a warning.
        let remote = match &target {
            Some(entry) => {
                let mut map: HashMap<String, DriveEntry> = HashMap::new();
                for child in self.client.list_children(&entry.id).await? {
                    let key = child.name.to_lowercase();
                    if map.contains_key(&key) {
                        eprintln!(
                            "[gdriveup] warning: {rel} holds more than one remote entry named {}",
                            child.name
                        );
                    } else {
                        map.insert(key, child);
                    }
                }
                map
            }
            None => HashMap::new(),
        };

        if ctx.is_cancelled() {
            return Ok(());
        }

        let (files, dirs) = list_local(dir)?;

        let jobs: Vec<_> = files
            .iter()
            .map(|child| self.sync_file(&child.path, &child.name, &record, &remote, ctx))
            .collect();
        futures_util::future::join_all(jobs).await;

        // Child folders run one at a time; creating sibling folders under a
        // shared parent concurrently is not safe against the remote service.
        let parent_id = target.map(|entry| entry.id);
        for child in dirs {
            if ctx.is_cancelled() {
                return Ok(());
            }
            let child_rel = paths::child_key(rel, &child.name);
            self.run_folder(
                child.path,
                child_rel,
                FolderTarget::Under(parent_id.clone()),
                Arc::clone(ctx),
            )
            .await;
        }

        Ok(())
    }
}

fn list_local(dir: &Path) -> io::Result<(Vec<LocalChild>, Vec<LocalChild>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let child = LocalChild {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
        };
        if file_type.is_dir() {
            dirs.push(child);
        } else if file_type.is_file() {
            files.push(child);
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok((files, dirs))
}
