//! Core domain types
//!
//! This module contains the core domain structures used across Livecast crates.
//! The controller persists and supervises them; the client and CLI only read them
//! through the DTOs.

pub mod broadcast;
pub mod job;
pub mod quality;
pub mod schedule;
