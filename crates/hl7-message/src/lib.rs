#![deny(warnings)]
#![deny(rust_2018_idioms)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

//! # hl7-message
//!
//! The HL7 v2 element tree and its ER7 wire codec.
//!
//! A message is a typed tree of [`Element`] nodes (Message, Group, Segment,
//! Field, Component, SubComponent) governed by the per-version tables in
//! `hl7-schema`. The tree supports two validation disciplines: STRICT checks
//! every mutation against the schema; LENIENT accepts unknown structure and
//! defers reporting to a whole-tree audit.
//!
//! The `er7` module parses wire text into trees and prints trees back,
//! honouring the MSH-declared delimiter set and the escape alphabet; the two
//! directions are exact inverses modulo trailing-empty trimming.

/// ACK response construction.
pub mod ack;
/// The element tree: node kinds, navigation, and mutation.
pub mod element;
/// The ER7 codec: delimiters, escapes, parser, and printer.
pub mod er7;
/// Slash/bracket path parsing for tree navigation.
mod path;

pub use ack::build_ack;
pub use element::{Element, ElementKind, ValidationLevel};
pub use er7::parser::{parse_component, parse_field, parse_message, parse_segment, ParseOptions};
pub use er7::syntax::{Delimiters, SEGMENT_TERMINATOR};

use thiserror::Error;

/// Errors that can occur when building or manipulating element trees
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported HL7 version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid element name: {0}")]
    InvalidName(String),

    #[error("'{child}' is not a valid child of '{parent}'")]
    ChildNotValid { parent: String, child: String },

    #[error("No child named '{name}' under '{parent}'")]
    ChildNotFound { parent: String, name: String },

    #[error("Cannot add another '{child}' to '{parent}': limit of {max} reached")]
    MaxChildLimitReached {
        parent: String,
        child: String,
        max: usize,
    },

    #[error("Value for '{name}' is {length} characters, maximum is {max}")]
    MaxLengthReached {
        name: String,
        max: usize,
        length: usize,
    },

    #[error("Invalid value for '{name}' ({data_type}): {value:?}")]
    InvalidValue {
        name: String,
        data_type: String,
        value: String,
    },

    #[error("Invalid MSH encoding characters: {0}")]
    InvalidEncodingChars(String),

    #[error("Operation not allowed: {0}")]
    OperationNotAllowed(String),

    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Parse error at segment {index}: {message}")]
    Parse { index: usize, message: String },

    #[error(transparent)]
    Schema(#[from] hl7_schema::Error),
}

/// Crate-local result type for tree and codec operations.
pub type Result<T> = std::result::Result<T, Error>;
