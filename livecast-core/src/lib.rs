//! Livecast Core
//!
//! Core types and abstractions for the Livecast stream supervisor.
//!
//! This crate contains:
//! - Domain types: Core business entities (Job, Quality, schedule, broadcast state)
//! - DTOs: Data transfer objects between the controller and its clients

pub mod domain;
pub mod dto;
