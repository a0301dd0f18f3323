//! Core domain types
//!
//! This module contains the core domain structures used across Canopy services.
//! These types represent the fundamental business entities and are shared between
//! orchestrator (for persistence) and worker (for execution).

pub mod backend;
pub mod job;
pub mod pipeline;
pub mod unit;
