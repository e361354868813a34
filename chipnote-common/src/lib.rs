//! # chipnote Common Library
//!
//! Shared code for the chipnote services:
//! - Error and result types
//! - Configuration file resolution and TOML loading
//! - Job progress wire types streamed to clients

pub mod config;
pub mod error;
pub mod progress;

pub use error::{Error, Result};
pub use progress::{JobId, JobSnapshot, JobStatus, TOTAL_STAGES};
