//! Core domain types
//!
//! This module contains the core domain structures used across the vmchecker
//! services. These types represent the fundamental business entities and are
//! shared between the queue manager (for scheduling) and the callback client
//! (for reporting).

pub mod grade;
pub mod machine;
pub mod submission;
