//! Database queries

pub mod parent_account;
pub mod publisher;
pub mod queue;
