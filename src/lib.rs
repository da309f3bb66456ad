//! Aurum Library
//!
//! Multi-source gold spot price consensus tracker

pub mod config;
pub mod consensus;
pub mod indicators;
pub mod orchestrator;
pub mod scheduler;
pub mod service;
pub mod sources;
pub mod store;
pub mod types;
