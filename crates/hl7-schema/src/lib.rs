//! # hl7-schema
//!
//! Per-version HL7 v2 schema tables and pure lookup functions.
//!
//! Each supported version (2.2 through 2.6) ships as an embedded table
//! enumerating message structures, segment groups, segments, fields, and
//! data types with their cardinalities and base-type constraints. Tables are
//! compiled once per process, shared immutably, and looked up through a
//! cheap [`SchemaRegistry`] handle. Site-specific profiles (Z-segments,
//! constrained structures) overlay the built-in tables without affecting
//! other users of the same version.

/// Version table and custom-profile loading.
mod loader;
/// Schema model types shared by tables and lookups.
pub mod model;
/// Overlay merge used for version deltas and profiles.
mod overlay;
/// The per-version registry and its lookup API.
pub mod registry;

pub use model::{
    BaseConstraints, Cardinality, ChildDef, ComponentSlot, DataTypeDef, FieldSlot, GroupDef,
    MessageDef, SchemaFile, SegmentDef, StructureInfo, StructureKind, StructureSlot,
};
pub use registry::{SchemaRegistry, Version};

use thiserror::Error;

/// Errors that can occur when loading or querying schema tables
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported HL7 version: {0}")]
    UnsupportedVersion(String),

    #[error("Schema profile not found: {0}")]
    NotFound(String),

    #[error("Invalid schema format: {0}")]
    InvalidFormat(String),
}

/// Crate-local result type for schema operations.
pub type Result<T> = std::result::Result<T, Error>;
