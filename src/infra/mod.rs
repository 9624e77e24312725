//! Infrastructure layer: adapters for config, logging, and collaborator stand-ins.

pub mod config;
pub mod contracts;
pub mod directory_file;
pub mod error;
pub mod logging;
pub mod stubs;
