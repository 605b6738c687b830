//! Test support for the webhook delivery workspace.
//!
//! Provides isolated PostgreSQL databases so the production storage layer
//! can be exercised against real SQL instead of mocks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;

pub use database::TestDatabase;
