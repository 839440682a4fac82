//! The ER7 codec
//!
//! ER7 is the delimited textual encoding of HL7 v2 messages: segments end in
//! a carriage return, fields split on the MSH-declared separators, and a
//! small escape alphabet protects delimiter characters inside values.
//! [`parser`] builds element trees from wire text, [`printer`] serialises
//! them back; the two are exact inverses modulo trailing-empty trimming.

/// Text-to-tree parsing and schema-directed grouping.
pub mod parser;
/// Tree-to-text serialisation.
pub(crate) mod printer;
/// Delimiter roles and the escape alphabet.
pub mod syntax;
