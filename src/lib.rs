//! Core engine for a customer-support inbox: conversations with their
//! messages and delivery status, agent assignment, and broadcast campaigns
//! to customer segments.

pub mod domain;
pub mod engine;
pub mod infra;
#[cfg(test)]
mod test_support;
pub mod usecases;
