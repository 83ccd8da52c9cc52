//! Batch sequencing of one fixer across a resolved fix set.
//!
//! The coordinator owns the all-or-nothing guarantee at the batch level:
//! `prepare` once, `fix` per physical location (strictly sequential, since
//! the underlying stores are not safe for concurrent mutation), then `cleanup`
//! on full success or best-effort `rollback` on the first hard error. No
//! partial fix set is ever reported as successful.

use crate::fix::traits::{FixError, Fixer};
use crate::model::{ArtifactPayload, DependencyDescriptor, FixMap};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Drives one [`Fixer`] across the descriptors resolved for a single
/// dependency-store target. Fixing multiple independent targets at once
/// means running independent coordinators against independent store roots;
/// cross-target concurrency is the caller's problem (e.g. a lock file at
/// the target root).
pub struct FixCoordinator {
    /// Human-readable target label, for logging only
    target: String,
}

impl FixCoordinator {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    /// Applies every descriptor in `fix_map` using `fixer`, with payloads
    /// looked up by origin id.
    ///
    /// Descriptors are applied in sorted id order for deterministic runs.
    /// Returns the applied descriptors with their `fixed_paths` populated
    /// (a subset of `locations` when duplicates were no-ops).
    ///
    /// # Errors
    ///
    /// A missing payload fails the batch before any mutation. A `prepare`
    /// failure aborts with nothing to roll back. Any `fix` failure triggers
    /// a best-effort rollback of everything applied so far, and the
    /// triggering error is surfaced undecorated.
    pub fn apply(
        &self,
        fixer: &mut dyn Fixer,
        fix_map: FixMap,
        payloads: &HashMap<String, ArtifactPayload>,
    ) -> Result<Vec<DependencyDescriptor>, FixError> {
        for id in fix_map.keys() {
            if !payloads.contains_key(id) {
                return Err(FixError::MissingPayload { id: id.clone() });
            }
        }

        info!(target = %self.target, descriptors = fix_map.len(), "Starting fix batch");
        fixer.prepare()?;

        let mut descriptors: Vec<DependencyDescriptor> = fix_map.into_values().collect();
        descriptors.sort_by_key(|d| d.id());

        for descriptor in &mut descriptors {
            let id = descriptor.id();
            let payload = &payloads[&id];
            for location in descriptor.locations.clone() {
                match fixer.fix(descriptor, &location, payload) {
                    Ok(outcome) if outcome.applied => {
                        descriptor.fixed_paths.push(outcome.patched_path);
                    }
                    Ok(outcome) => {
                        debug!(
                            id = %id,
                            path = %outcome.patched_path.display(),
                            "Location already fixed in this batch"
                        );
                    }
                    Err(e) => {
                        warn!(target = %self.target, id = %id, error = %e, "Fix failed, rolling back batch");
                        if !fixer.rollback() {
                            warn!(target = %self.target, "Rollback left unrestored entries");
                        }
                        return Err(e);
                    }
                }
            }
        }

        if !fixer.cleanup() {
            warn!(target = %self.target, "Cleanup failed; staging area left on disk");
        }
        let patched: usize = descriptors.iter().map(|d| d.fixed_paths.len()).sum();
        info!(target = %self.target, patched, "Fix batch completed");
        Ok(descriptors)
    }
}
