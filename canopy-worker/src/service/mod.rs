//! Service layer
//!
//! Services contain the worker's business logic on top of the repositories.
//! They are trait-based so the consumer can run against fakes in tests.

mod inference;

// Re-export traits
pub use inference::InferenceService;

// Re-export implementations
pub use inference::RemoteInferenceService;
