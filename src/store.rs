//! Temporary media store.
//!
//! Each process owns one isolated directory under the configured temp root.
//! Jobs acquire uniquely named files inside it and those files are removed on
//! every exit path: explicitly through [`TempMediaStore::release`] or
//! [`JobFiles::release`], or by `Drop` when a job unwinds early. Removal
//! failures are logged and counted, never returned.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tempfile::TempDir;
use uuid::Uuid;

use crate::error::{CleanupError, RelayError, RelayResult};
use crate::pipeline::MediaKind;

/// Prefix of per-process store directories.
pub const STORE_DIR_PREFIX: &str = "vehicle-relay-";

const MAX_NAME_ATTEMPTS: usize = 8;

/// Counters for leak checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub created: u64,
    pub removed: u64,
    pub cleanup_failures: u64,
}

impl StoreStats {
    /// Handles created but not yet removed.
    pub fn outstanding(&self) -> u64 {
        self.created.saturating_sub(self.removed)
    }
}

pub struct TempMediaStore {
    dir: TempDir,
    created: AtomicU64,
    removed: AtomicU64,
    cleanup_failures: AtomicU64,
}

impl TempMediaStore {
    /// Create the isolated directory under `root`, creating `root` if needed.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("create temp root {}", root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(STORE_DIR_PREFIX)
            .tempdir_in(root)
            .with_context(|| format!("create media store under {}", root.display()))?;
        log::info!("media store at {}", dir.path().display());
        Ok(Self {
            dir,
            created: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            cleanup_failures: AtomicU64::new(0),
        })
    }

    /// Like [`open`](Self::open), first removing store directories left behind
    /// by earlier processes that are older than `stale_after`.
    pub fn open_sweeping(root: &Path, stale_after: Duration) -> Result<Self> {
        if root.is_dir() {
            let swept = sweep_stale(root, stale_after);
            if swept > 0 {
                log::info!("swept {} stale media store(s) under {}", swept, root.display());
            }
        }
        Self::open(root)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Create a new, empty file with a unique name ending in `suffix`.
    ///
    /// The file is created exclusively, so the returned path never refers to
    /// a file that existed before the call.
    pub fn acquire(&self, suffix: &str) -> RelayResult<MediaHandle<'_>> {
        let mut last_err = None;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self
                .dir
                .path()
                .join(format!("{}{}", Uuid::new_v4().simple(), suffix));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    self.created.fetch_add(1, Ordering::SeqCst);
                    log::trace!("acquired {}", path.display());
                    return Ok(MediaHandle {
                        store: self,
                        path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    last_err = Some(RelayError::io(path, e));
                }
                Err(e) => return Err(RelayError::io(path, e)),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            RelayError::io(
                self.dir.path(),
                io::Error::new(io::ErrorKind::AlreadyExists, "no unique name available"),
            )
        }))
    }

    /// Acquire the input and output handle for one job.
    pub fn acquire_job(&self, kind: MediaKind) -> RelayResult<JobFiles<'_>> {
        let input = self.acquire(kind.suffix())?;
        // `input` is released by Drop if the second acquisition fails.
        let output = self.acquire(kind.suffix())?;
        Ok(JobFiles { input, output })
    }

    /// Delete the handle's file if present. Failures are logged, not returned.
    pub fn release(&self, mut handle: MediaHandle<'_>) {
        handle.release_inner();
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            created: self.created.load(Ordering::SeqCst),
            removed: self.removed.load(Ordering::SeqCst),
            cleanup_failures: self.cleanup_failures.load(Ordering::SeqCst),
        }
    }

    fn remove(&self, path: &Path) -> Result<(), CleanupError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CleanupError {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// A file owned by one job. Removed on release or drop.
pub struct MediaHandle<'s> {
    store: &'s TempMediaStore,
    path: PathBuf,
    released: bool,
}

impl MediaHandle<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.store.remove(&self.path) {
            Ok(()) => {
                self.store.removed.fetch_add(1, Ordering::SeqCst);
                log::trace!("released {}", self.path.display());
            }
            Err(e) => {
                self.store.cleanup_failures.fetch_add(1, Ordering::SeqCst);
                log::warn!("{}", e);
            }
        }
    }
}

impl Drop for MediaHandle<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl std::fmt::Debug for MediaHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaHandle")
            .field("path", &self.path)
            .field("released", &self.released)
            .finish()
    }
}

/// Input and output handle for one job, released together.
#[derive(Debug)]
pub struct JobFiles<'s> {
    input: MediaHandle<'s>,
    output: MediaHandle<'s>,
}

impl JobFiles<'_> {
    pub fn input(&self) -> &Path {
        self.input.path()
    }

    pub fn output(&self) -> &Path {
        self.output.path()
    }

    pub fn release(self) {
        let Self { input, output } = self;
        let store = input.store;
        store.release(input);
        store.release(output);
    }
}

/// Remove `vehicle-relay-*` directories under `root` older than `stale_after`.
fn sweep_stale(root: &Path, stale_after: Duration) -> usize {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("cannot scan {} for stale stores: {}", root.display(), e);
            return 0;
        }
    };
    let now = SystemTime::now();
    let mut swept = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(STORE_DIR_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < stale_after {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => swept += 1,
            Err(e) => log::warn!("failed to sweep {}: {}", entry.path().display(), e),
        }
    }
    swept
}
