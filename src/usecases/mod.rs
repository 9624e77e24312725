//! Use case layer: workflows against external collaborators and the inbox
//! façade callers go through.

pub mod audience;
pub mod bootstrap;
pub mod broadcast;
pub mod context;
pub mod contracts;
pub mod inbox;
pub mod scheduler_daemon;
