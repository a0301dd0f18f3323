//! Repository layer
//!
//! Repositories are thin adapters over the orchestrator API. They carry no
//! business logic and are trait-based so the consumer can be tested against
//! in-process fakes.

mod jobs;
mod pipelines;
mod units;

// Re-export traits
pub use jobs::JobRepository;
pub use pipelines::PipelineRepository;
pub use units::UnitRepository;

// Re-export implementations
pub use jobs::HttpJobRepository;
pub use pipelines::HttpPipelineRepository;
pub use units::HttpUnitRepository;
