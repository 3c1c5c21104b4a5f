//! Gate, execution and teardown of the final merge.

pub mod cleanup;
pub mod conflict;
pub mod executor;
pub mod validation;

pub use cleanup::{CleanupReport, PostMergeCleanupCoordinator};
pub use conflict::{Complexity, ConflictAnalyzer, ConflictDetail, ConflictReport, ConflictType};
pub use executor::{MergeExecutor, MergeResult};
pub use validation::{MergeGateResult, MergeValidationPipeline, ValidationResult};
