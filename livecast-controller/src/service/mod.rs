//! Service Module
//!
//! Business logic layer for the controller.
//! Services orchestrate between the registry, the encoder processes and
//! the remote broadcast platform.

pub mod broadcast;
pub mod control;
pub mod job;
pub mod reconcile;
pub mod scheduler;
pub mod supervisor;

// Re-export for convenience
pub use job as job_service;
