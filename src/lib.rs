//! Backhaul - task-driven backup tool
//!
//! This library crate exposes the orchestrator for integration testing.

pub mod backup;
pub mod config;
pub mod restore;
pub mod tasks;
