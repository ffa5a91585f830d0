//! Shared types for the Tether workspace: the configuration model and the
//! common error type.

pub mod config;
pub mod error;

pub use error::{Error, Result};
