//! Fix module - transactional in-place replacement of dependency artifacts.
//!
//! This module provides the transactional core of the engine:
//! - **Contract**: the per-ecosystem [`Fixer`] state machine
//!   (Prepare → Fix* → Cleanup | Rollback)
//! - **Bookkeeping**: [`BackupLedger`], the original-path → backup-path arena
//!   backing the rollback guarantee
//! - **Store backend**: [`PathStoreFixer`] for path-addressed stores, with
//!   the byte-level repackaging seam behind [`ArtifactInstaller`]
//! - **Selection**: [`FixerRegistry`], runtime dispatch by ecosystem tag
//! - **Sequencing**: [`FixCoordinator`], the all-or-nothing batch driver

pub mod backup;
pub mod coordinator;
pub mod registry;
pub mod store;
pub mod traits;

// Re-export commonly used types
pub use backup::BackupLedger;
pub use coordinator::FixCoordinator;
pub use registry::FixerRegistry;
pub use store::{PathStoreFixer, RawFileInstaller};
pub use traits::{ArtifactInstaller, FixError, FixOutcome, Fixer};
