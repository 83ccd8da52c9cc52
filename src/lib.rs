pub mod dispatch;
pub mod engine;
pub mod fix;
pub mod model;
pub mod resolve;
pub mod traits;

// Re-export common types for convenience
pub use dispatch::*;
pub use engine::*;
pub use fix::{
    ArtifactInstaller, BackupLedger, FixCoordinator, FixError, FixOutcome, Fixer, FixerRegistry,
    PathStoreFixer, RawFileInstaller,
};
pub use model::*;
pub use resolve::*;
pub use traits::*;
