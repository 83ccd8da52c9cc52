//! Fixer for path-addressed dependency stores.
//!
//! [`PathStoreFixer`] covers every ecosystem whose installed artifact is one
//! filesystem path (a jar in a cache, a tarball-extracted directory, a
//! module under a vendor tree). The ecosystem-specific byte format lives
//! entirely behind the injected [`ArtifactInstaller`]; this type owns only
//! the transactional choreography: backup before write, duplicate-path
//! no-ops, escape-proof symlink handling, rollback and cleanup.

use crate::fix::backup::BackupLedger;
use crate::fix::traits::{ArtifactInstaller, FixError, FixOutcome, Fixer};
use crate::model::{ArtifactPayload, Dependency, DependencyDescriptor};
use std::path::{Path, PathBuf};
use tracing::info;

pub struct PathStoreFixer {
    /// Root of the dependency store being fixed; symlinked locations must
    /// resolve inside it
    store_root: PathBuf,

    /// Rollback bookkeeping, private to this instance
    ledger: BackupLedger,

    /// Byte-level repackaging collaborator
    installer: Box<dyn ArtifactInstaller>,
}

impl PathStoreFixer {
    /// Creates a fixer for the store rooted at `store_root`, with a
    /// process-private staging area in a dot-directory directly under it.
    /// Staging beside the artifacts keeps backups on the same filesystem,
    /// so they move by `rename` rather than by copy.
    pub fn new(store_root: impl Into<PathBuf>, installer: Box<dyn ArtifactInstaller>) -> Self {
        let store_root = store_root.into();
        let ledger = BackupLedger::process_private_under(&store_root, "store");
        Self {
            store_root,
            ledger,
            installer,
        }
    }

    /// Overrides the staging area location.
    pub fn with_staging_root(mut self, staging_root: PathBuf) -> Self {
        self.ledger = BackupLedger::new(staging_root);
        self
    }

    /// Rejects symlinked locations whose target lives outside the store.
    fn check_link_target(&self, target: &Path) -> Result<(), FixError> {
        let resolved = std::fs::canonicalize(target)?;
        let root = std::fs::canonicalize(&self.store_root).unwrap_or_else(|_| self.store_root.clone());
        if !resolved.starts_with(&root) {
            return Err(FixError::LinkEscapesStore {
                attempted: target.display().to_string(),
            });
        }
        Ok(())
    }
}

impl Fixer for PathStoreFixer {
    fn prepare(&mut self) -> Result<(), FixError> {
        self.ledger
            .prepare()
            .map_err(|e| FixError::PrepareFailed(e.to_string()))
    }

    fn fix(
        &mut self,
        descriptor: &DependencyDescriptor,
        dependency: &Dependency,
        payload: &ArtifactPayload,
    ) -> Result<FixOutcome, FixError> {
        let target = dependency.disk_path.clone();

        // Deduplicated trees hand the same physical path in more than once.
        if self.ledger.contains(&target) {
            return Ok(FixOutcome {
                applied: false,
                patched_path: target,
            });
        }

        // A missing artifact is a genuine failure, not a no-op.
        let meta = std::fs::symlink_metadata(&target)?;
        if dependency.is_link || meta.file_type().is_symlink() {
            self.check_link_target(&target)?;
        }

        // Original moved aside before any destructive write.
        self.ledger.stash(&target).map_err(|e| FixError::BackupFailed {
            path: target.display().to_string(),
            message: e.to_string(),
        })?;

        if let Err(e) = self.installer.install(payload, &target) {
            return Err(FixError::InstallFailed {
                path: target.display().to_string(),
                message: e.to_string(),
            });
        }

        info!(
            library = %descriptor.replacement.library,
            version = %descriptor.replacement.version,
            path = %target.display(),
            "Patched dependency artifact"
        );
        Ok(FixOutcome {
            applied: true,
            patched_path: target,
        })
    }

    fn rollback(&mut self) -> bool {
        self.ledger.restore_all()
    }

    fn cleanup(&mut self) -> bool {
        self.ledger.purge()
    }
}

/// Trivial installer for single-file stores: writes the payload bytes
/// verbatim at the patched location.
pub struct RawFileInstaller;

impl ArtifactInstaller for RawFileInstaller {
    fn install(
        &self,
        payload: &ArtifactPayload,
        dest: &Path,
    ) -> Result<(), crate::dispatch::BoxError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &payload.data)?;
        Ok(())
    }
}
