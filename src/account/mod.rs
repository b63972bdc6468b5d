//! Account module
//!
//! Balance rows mutated only by [`crate::transfer::TransferOrchestrator`].

pub mod models;

pub use models::Account;
