//! # hl7-validation
//!
//! Structural and data-type conformance checks for HL7 v2 element trees.
//!
//! The [`Validator`] audits a subtree against its version's schema tables
//! and reports every violation with a severity, a stable code, and the path
//! of the offending node. The [`Validate`] extension trait makes the audit
//! available as `element.validate()` on any tree node.

/// The audit engine and the `Validate` extension trait.
pub mod engine;
/// Issue and report types.
pub mod reporter;

pub use engine::{Validate, Validator};
pub use reporter::{codes, Severity, ValidationIssue, ValidationReport};

use thiserror::Error;

/// Errors that can occur while setting up an audit
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] hl7_schema::Error),
}

/// Crate-local result type for validation operations.
pub type Result<T> = std::result::Result<T, Error>;
