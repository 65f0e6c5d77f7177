//! Background Tasks Module
//!
//! Periodic maintenance tasks that run alongside the request path.

mod prune;

pub use prune::spawn_prune_task;
