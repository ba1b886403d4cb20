//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own transaction boundaries; repositories only participate in them.

pub mod account_service;
pub mod transfer_service;
