//! SupportChat Shared Types and Utilities
//!
//! This crate contains the chat domain model, the error taxonomy and database helpers
//! shared across the SupportChat workspace.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
