//! Vmchecker Core
//!
//! Core types and abstractions for the vmchecker autograding system.
//!
//! This crate contains:
//! - Domain types: Core business entities (submission config, machine
//!   overrides, grade outcome)
//! - DTOs: Data transfer objects for the upstream callback

pub mod domain;
pub mod dto;
