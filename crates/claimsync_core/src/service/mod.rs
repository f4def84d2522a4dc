//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate assembler and store calls into inbound use-cases.
//! - Keep CLI/adapter layers decoupled from storage details.

pub mod intake_service;
