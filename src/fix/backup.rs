//! Backup bookkeeping backing the rollback guarantee.
//!
//! A [`BackupLedger`] is a small arena keyed by original path: every artifact
//! moved aside before a destructive write gets one slot under a
//! process-private staging root. The ledger is owned by a single fixer
//! instance and never shared across coordinator runs. Only `purge` (cleanup)
//! clears it; `restore_all` (rollback) consumes the entries it restores.
//!
//! Backups move by `rename` when the staging root shares a filesystem with
//! the artifacts, and fall back to copy-then-remove when it does not.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Distinguishes staging roots of multiple fixers inside one process.
static STAGING_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Original path → backup path arena with a private staging directory.
#[derive(Debug)]
pub struct BackupLedger {
    /// Directory holding every backup slot
    staging_root: PathBuf,

    /// Original path → where its pre-fix content now lives
    entries: HashMap<PathBuf, PathBuf>,

    /// Fingerprint of a completed `prepare` for the current target
    prepared: bool,
}

impl BackupLedger {
    /// Creates a ledger rooted at an explicit staging directory.
    pub fn new(staging_root: PathBuf) -> Self {
        Self {
            staging_root,
            entries: HashMap::new(),
            prepared: false,
        }
    }

    /// Creates a ledger in a dot-directory directly under `base`, keyed by
    /// process id and an in-process sequence number so concurrent fixers
    /// never share a staging root.
    ///
    /// Callers pass the store root itself as `base` so staging stays on the
    /// same filesystem as the artifacts and backups can move by `rename`.
    pub fn process_private_under(base: &Path, tag: &str) -> Self {
        let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
        let root = base.join(format!(
            ".remedy-staging-{}-{}-{}",
            tag,
            std::process::id(),
            seq
        ));
        Self::new(root)
    }

    /// Creates the staging root. Idempotent: a ledger already prepared for
    /// this target (root recorded and still on disk) skips the work.
    pub fn prepare(&mut self) -> io::Result<()> {
        if self.prepared && self.staging_root.is_dir() {
            debug!(root = %self.staging_root.display(), "Staging area already prepared");
            return Ok(());
        }
        std::fs::create_dir_all(&self.staging_root)?;
        self.prepared = true;
        Ok(())
    }

    /// Whether `original` already has a recorded backup in this batch.
    pub fn contains(&self, original: &Path) -> bool {
        self.entries.contains_key(original)
    }

    /// Number of recorded backups.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The staging directory this ledger writes under.
    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Moves `original` (file or directory) into the staging area and
    /// records the mapping for rollback. Must be called **before** any
    /// destructive write at `original`.
    pub fn stash(&mut self, original: &Path) -> io::Result<PathBuf> {
        let slot = self.entries.len();
        let file_name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());
        let backup = self.staging_root.join(format!("{:04}-{}", slot, file_name));
        move_path(original, &backup)?;
        self.entries.insert(original.to_path_buf(), backup.clone());
        Ok(backup)
    }

    /// Restores every recorded backup to its original path, replacing
    /// whatever the aborted batch wrote there. Best-effort: every entry is
    /// attempted even when earlier restores fail. Returns whether all
    /// restores succeeded.
    pub fn restore_all(&mut self) -> bool {
        let mut all_restored = true;
        for (original, backup) in std::mem::take(&mut self.entries) {
            if let Err(e) = restore_entry(&original, &backup) {
                warn!(
                    original = %original.display(),
                    backup = %backup.display(),
                    error = %e,
                    "Failed to restore backup"
                );
                all_restored = false;
            }
        }
        all_restored
    }

    /// Removes the staging area and forgets every entry. Returns whether
    /// removal succeeded; failure is the caller's to log, not to retry.
    pub fn purge(&mut self) -> bool {
        self.entries.clear();
        self.prepared = false;
        match std::fs::remove_dir_all(&self.staging_root) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!(
                    root = %self.staging_root.display(),
                    error = %e,
                    "Failed to remove staging area"
                );
                false
            }
        }
    }
}

/// Puts one backup back, clearing any partially written replacement first.
fn restore_entry(original: &Path, backup: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(original) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(original)?,
        Ok(_) => std::fs::remove_file(original)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    move_path(backup, original)
}

/// Moves `src` to `dst`, preferring `rename` and falling back to
/// copy-then-remove when the two paths sit on different filesystems.
fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => copy_then_remove(src, dst),
        Err(e) => Err(e),
    }
}

/// Cross-filesystem move: replicate `src` at `dst`, then delete `src`.
fn copy_then_remove(src: &Path, dst: &Path) -> io::Result<()> {
    copy_recursively(src, dst)?;
    if std::fs::symlink_metadata(src)?.is_dir() {
        std::fs::remove_dir_all(src)
    } else {
        std::fs::remove_file(src)
    }
}

fn copy_recursively(src: &Path, dst: &Path) -> io::Result<()> {
    if std::fs::symlink_metadata(src)?.is_dir() {
        std::fs::create_dir_all(dst)?;
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        std::fs::copy(src, dst).map(|_| ())
    }
}
