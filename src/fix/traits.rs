//! The per-ecosystem fixer contract and its error taxonomy.

use crate::dispatch::BoxError;
use crate::model::{ArtifactPayload, Dependency, DependencyDescriptor};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while preparing or mutating a dependency store.
///
/// Any of these aborts the remaining batch and triggers a best-effort
/// rollback; rollback and cleanup themselves never raise, they report
/// booleans.
#[derive(Error, Debug)]
pub enum FixError {
    /// Staging-area setup failed; nothing has been mutated yet
    #[error("Staging area setup failed: {0}")]
    PrepareFailed(String),

    /// The original artifact could not be moved aside
    #[error("Backup of '{path}' failed: {message}")]
    BackupFailed { path: String, message: String },

    /// The patched payload could not be written at the original location
    #[error("Installing payload at '{path}' failed: {message}")]
    InstallFailed { path: String, message: String },

    /// A symlinked location resolves outside the store being fixed
    #[error("Symlinked location '{attempted}' escapes the store root")]
    LinkEscapesStore { attempted: String },

    /// No artifact payload was fetched for a descriptor in the batch
    #[error("Missing artifact payload for '{id}'")]
    MissingPayload { id: String },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of one [`Fixer::fix`] call.
#[derive(Debug, Clone)]
pub struct FixOutcome {
    /// `false` means the physical path was already fixed earlier in this
    /// batch: a benign no-op, not a failure
    pub applied: bool,

    /// The location that now holds (or already held) the patched artifact
    pub patched_path: PathBuf,
}

/// The transactional unit every ecosystem backend implements.
///
/// The coordinator always drives a batch as `prepare` once, then `fix` once
/// per physical [`Dependency`] instance, then exactly one of `cleanup` (all
/// fixes succeeded) or `rollback` (any fix failed).
///
/// # Durability invariant
///
/// Once `fix` returns `applied = true` for a path, that path's pre-fix bytes
/// must remain retrievable until `cleanup` or `rollback` runs. A killed
/// process leaves the backup area on disk for manual inspection; there is no
/// cross-process recovery.
pub trait Fixer: Send {
    /// Idempotent setup of the staging/backup area. Must detect an already
    /// prepared target and skip the work. Failure aborts the batch before
    /// any mutation; there is nothing to roll back yet.
    fn prepare(&mut self) -> Result<(), FixError>;

    /// Patches one physical location: move the original artifact into the
    /// backup area first, then write the payload in its place.
    ///
    /// # Errors
    ///
    /// Only genuine failures (I/O, malformed payload, escaping symlinks).
    /// A duplicate physical path yields `Ok` with `applied = false`.
    fn fix(
        &mut self,
        descriptor: &DependencyDescriptor,
        dependency: &Dependency,
        payload: &ArtifactPayload,
    ) -> Result<FixOutcome, FixError>;

    /// Restores every recorded backup to its original path. Best-effort:
    /// attempts every entry even when some restores fail. Returns whether
    /// every single restore succeeded, purely for reporting.
    fn rollback(&mut self) -> bool;

    /// Removes the staging area. Only called after a fully successful batch;
    /// failure is non-fatal (logged, never retried).
    fn cleanup(&mut self) -> bool;
}

/// The byte-level repackaging seam: turns an opaque payload into on-disk
/// content at the patched location. Implementations own the ecosystem's
/// archive/package format; this crate never inspects the bytes.
pub trait ArtifactInstaller: Send + Sync {
    /// Writes/extracts `payload` at `dest`, fully replacing its contents.
    fn install(&self, payload: &ArtifactPayload, dest: &Path) -> Result<(), BoxError>;
}
