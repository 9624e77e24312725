//! Domain layer: core entities and business rules.

pub mod agent;
pub mod audience;
pub mod campaign;
pub mod contact;
pub mod conversation;
pub mod error;
pub mod events;
pub mod ids;
pub mod message;
pub mod reply;
