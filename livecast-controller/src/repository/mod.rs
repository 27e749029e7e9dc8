//! Repository Module
//!
//! Persistent state of the controller.
//! The registry holds the job records; the tracking store holds one pid
//! marker and status file per live job for recovery after a restart.

pub mod registry;
pub mod tracking;
