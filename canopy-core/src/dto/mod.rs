//! Data Transfer Objects for inter-service communication
//!
//! This module contains DTOs used for communication between Canopy services
//! (orchestrator, worker, cli) and with remote processing services.

pub mod image;
pub mod job;
pub mod processing;
pub mod queue;
pub mod registry;
