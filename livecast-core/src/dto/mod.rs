//! Data Transfer Objects
//!
//! This module contains DTOs exchanged between the controller API and its
//! clients. They are lightweight, redacted views of the domain entities.

pub mod job;
pub mod log;
pub mod media;
pub mod status;
