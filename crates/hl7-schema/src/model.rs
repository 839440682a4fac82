//! Schema model definitions

use serde::{Deserialize, Serialize};

/// The kind of structure a schema name resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureKind {
    /// A message structure (e.g. `ADT_A01`)
    Message,

    /// A segment group within a message structure (e.g. `ADT_A01_INSURANCE`)
    Group,

    /// A segment (e.g. `PID`)
    Segment,

    /// A field within a segment (e.g. `PID_5`)
    Field,

    /// A component of a composite data type (e.g. `XPN_1`, alias `PID_5_1`)
    Component,

    /// A subcomponent of a composite component (e.g. `FN_1`)
    SubComponent,

    /// Name does not resolve in this version's tables
    Unknown,
}

/// Occurrence bounds for a schema child
///
/// `max == -1` denotes an unbounded maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    pub min: usize,
    pub max: i32,
}

impl Cardinality {
    /// A required singleton: exactly one occurrence
    pub const REQUIRED: Cardinality = Cardinality { min: 1, max: 1 };

    /// An optional singleton: zero or one occurrence
    pub const OPTIONAL: Cardinality = Cardinality { min: 0, max: 1 };

    pub fn new(min: usize, max: i32) -> Self {
        Self { min, max }
    }

    /// Whether the maximum is unbounded
    pub fn is_unbounded(&self) -> bool {
        self.max < 0
    }

    /// Whether `count` occurrences satisfy the upper bound
    pub fn accepts(&self, count: usize) -> bool {
        self.is_unbounded() || count < self.max as usize
    }

    /// Whether `count` occurrences lie within `[min, max]`
    pub fn contains(&self, count: usize) -> bool {
        count >= self.min && (self.is_unbounded() || count <= self.max as usize)
    }
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::OPTIONAL
    }
}

/// A resolved schema child: what may appear under a given parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDef {
    /// Canonical schema key (e.g. `PID`, `PID_5`, `XPN_1`)
    pub name: String,

    /// Human label used for long-name lookup (e.g. `patient_name`)
    pub long_name: Option<String>,

    /// The kind a child filling this slot has
    pub kind: StructureKind,

    /// Occurrence bounds for this slot
    pub cardinality: Cardinality,

    /// Data type code for field/component slots (e.g. `XPN`, `ST`)
    pub data_type: Option<String>,
}

/// The result of resolving a name in the registry
#[derive(Debug, Clone)]
pub struct StructureInfo {
    /// Canonical, alias-resolved name (`PID_5_1` resolves to `XPN_1`)
    pub name: String,

    /// What kind of structure the name denotes
    pub kind: StructureKind,

    /// Data type code, for field/component names
    pub data_type: Option<String>,

    /// Human label, where the schema defines one
    pub long_name: Option<String>,
}

impl StructureInfo {
    pub(crate) fn unknown(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: StructureKind::Unknown,
            data_type: None,
            long_name: None,
        }
    }
}

/// Constraints carried by a base (scalar) data type
#[derive(Debug, Clone, Default)]
pub struct BaseConstraints {
    /// Maximum decoded value length
    pub max_length: Option<usize>,

    /// Anchored pattern the whole value must match
    pub pattern: Option<regex::Regex>,

    /// Allowed character set, when narrower than the pattern expresses
    pub charset: Option<String>,
}

impl BaseConstraints {
    /// Whether `value` satisfies length, pattern, and charset constraints
    pub fn permits(&self, value: &str) -> bool {
        if let Some(max) = self.max_length {
            if value.chars().count() > max {
                return false;
            }
        }
        if let Some(ref pattern) = self.pattern {
            if !pattern.is_match(value) {
                return false;
            }
        }
        if let Some(ref charset) = self.charset {
            if !value.chars().all(|c| charset.contains(c)) {
                return false;
            }
        }
        true
    }
}

fn default_max() -> i32 {
    1
}

/// One slot in a message or group structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureSlot {
    /// Segment or group name
    pub name: String,

    /// True when the slot names a group rather than a segment
    #[serde(default)]
    pub group: bool,

    #[serde(default)]
    pub min: usize,

    #[serde(default = "default_max")]
    pub max: i32,
}

/// One field slot in a segment definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSlot {
    /// Field key, `<SEGMENT>_<n>` (e.g. `PID_5`)
    pub name: String,

    /// Human label (e.g. `patient_name`)
    pub long_name: String,

    /// Data type code
    pub data_type: String,

    #[serde(default)]
    pub min: usize,

    #[serde(default = "default_max")]
    pub max: i32,
}

/// One component slot in a composite data type definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSlot {
    /// Component key, `<COMPOSITE>_<n>` (e.g. `XPN_1`)
    pub name: String,

    /// Human label (e.g. `family_name`)
    pub long_name: String,

    /// Data type code
    pub data_type: String,
}

/// A message structure definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDef {
    pub name: String,
    pub children: Vec<StructureSlot>,
}

/// A segment group definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDef {
    pub name: String,
    pub children: Vec<StructureSlot>,
}

/// A segment definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDef {
    pub name: String,
    pub fields: Vec<FieldSlot>,
}

/// A data type definition: base (scalar) or composite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataTypeDef {
    /// Type code (e.g. `ST`, `XPN`)
    pub code: String,

    /// True for base (scalar) types
    #[serde(default)]
    pub base: bool,

    /// Component slots, for composite types
    #[serde(default)]
    pub components: Vec<ComponentSlot>,

    /// Maximum value length, for base types
    #[serde(default)]
    pub max_length: Option<usize>,

    /// Anchored regex the value must match, for base types
    #[serde(default)]
    pub pattern: Option<String>,

    /// Allowed character set, for base types
    #[serde(default)]
    pub charset: Option<String>,
}

/// The on-disk shape of a version table or profile overlay
///
/// The embedded per-version tables, and any custom profile a caller loads on
/// top of them, share this format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaFile {
    /// Version label the file targets (informational for overlays)
    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub messages: Vec<MessageDef>,

    #[serde(default)]
    pub groups: Vec<GroupDef>,

    #[serde(default)]
    pub segments: Vec<SegmentDef>,

    #[serde(default)]
    pub datatypes: Vec<DataTypeDef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cardinality_bounds() {
        let c = Cardinality::new(1, 3);
        assert!(c.accepts(0));
        assert!(c.accepts(2));
        assert!(!c.accepts(3));
        assert!(!c.contains(0));
        assert!(c.contains(3));
        assert!(!c.contains(4));
    }

    #[test]
    fn test_cardinality_unbounded() {
        let c = Cardinality::new(0, -1);
        assert!(c.is_unbounded());
        assert!(c.accepts(10_000));
        assert!(c.contains(0));
    }

    #[test]
    fn test_base_constraints_permits() {
        let constraints = BaseConstraints {
            max_length: Some(4),
            pattern: Some(regex::Regex::new(r"^\d+$").unwrap()),
            charset: None,
        };
        assert!(constraints.permits("1234"));
        assert!(!constraints.permits("12345"));
        assert!(!constraints.permits("12a"));
    }

    #[test]
    fn test_schema_file_defaults() {
        let file: SchemaFile = serde_json::from_str(r#"{"version": "2.5"}"#).unwrap();
        assert_eq!(file.version.as_deref(), Some("2.5"));
        assert!(file.messages.is_empty());
        assert!(file.segments.is_empty());
    }

    #[test]
    fn test_field_slot_max_defaults_to_one() {
        let slot: FieldSlot = serde_json::from_str(
            r#"{"name": "PID_1", "long_name": "set_id_pid", "data_type": "SI"}"#,
        )
        .unwrap();
        assert_eq!(slot.max, 1);
        assert_eq!(slot.min, 0);
    }
}
