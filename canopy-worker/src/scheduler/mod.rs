//! Scheduler layer for the worker
//!
//! Runs the consumer loops that lease units, process them and settle their
//! leases.

pub mod consumer;

pub use consumer::UnitConsumer;
