//! Canopy Core
//!
//! Core types and abstractions for the Canopy ML pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: Core business entities (Pipeline, Backend, Job, WorkUnit, etc.)
//! - DTOs: Data transfer objects for inter-service communication
//! - Pure policies shared by orchestrator and worker: queue naming, the job
//!   state machine, service selection and unit retry

pub mod domain;
pub mod dto;
pub mod error;
pub mod registry;
pub mod retry;

pub use error::{CoreError, OrchestrationError};
