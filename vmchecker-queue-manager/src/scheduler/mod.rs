//! Scheduler layer for the queue manager
//!
//! This layer fans the assignment queue out to the worker pool and
//! coordinates per-job processing from dequeue to completion.

pub mod dispatcher;

pub use dispatcher::Dispatcher;
