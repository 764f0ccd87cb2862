//! Core migration model for strata.
//!
//! This crate defines versioned migration files, the schema history
//! ledger that records which versions were applied, the advisory run lock,
//! and the error taxonomy shared by the applier and the CLI.

#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]

pub mod error;
pub mod model;
pub mod schema;

pub use error::{Error, ErrorKind, Result};
