//! Per-version registry with pure lookup functions
//!
//! A [`SchemaRegistry`] is a cheap handle onto an immutable, process-wide
//! version table. Lookups are pure; the underlying tables are shared via
//! `Arc` and never mutated after load.

use crate::model::{
    BaseConstraints, Cardinality, ChildDef, SchemaFile, StructureInfo, StructureKind,
};
use crate::{loader, Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Supported HL7 v2 versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Version {
    V2_2,
    V2_3,
    V2_3_1,
    V2_4,
    V2_5,
    V2_5_1,
    V2_6,
}

impl Version {
    /// All supported versions, oldest first
    pub const ALL: [Version; 7] = [
        Version::V2_2,
        Version::V2_3,
        Version::V2_3_1,
        Version::V2_4,
        Version::V2_5,
        Version::V2_5_1,
        Version::V2_6,
    ];

    /// The wire label, as carried in MSH-12 (e.g. `2.5.1`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V2_2 => "2.2",
            Version::V2_3 => "2.3",
            Version::V2_3_1 => "2.3.1",
            Version::V2_4 => "2.4",
            Version::V2_5 => "2.5",
            Version::V2_5_1 => "2.5.1",
            Version::V2_6 => "2.6",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim())
            .ok_or_else(|| Error::UnsupportedVersion(s.to_string()))
    }
}

/// The compiled, immutable tables for one version
#[derive(Debug)]
pub(crate) struct VersionSchema {
    version: Version,
    /// Merged source file, retained so profiles can overlay further
    pub(crate) source: SchemaFile,
    message_children: HashMap<String, Vec<ChildDef>>,
    group_children: HashMap<String, Vec<ChildDef>>,
    segment_children: HashMap<String, Vec<ChildDef>>,
    datatype_children: HashMap<String, Vec<ChildDef>>,
    base_types: HashMap<String, BaseConstraints>,
}

impl VersionSchema {
    /// Compile a merged schema file into lookup tables
    pub(crate) fn compile(version: Version, source: SchemaFile) -> Result<Self> {
        let mut message_children = HashMap::new();
        let mut group_children = HashMap::new();
        let mut segment_children = HashMap::new();
        let mut datatype_children = HashMap::new();
        let mut base_types = HashMap::new();

        for message in &source.messages {
            message_children.insert(
                message.name.clone(),
                structure_slots_to_children(&message.children),
            );
        }
        for group in &source.groups {
            group_children.insert(
                group.name.clone(),
                structure_slots_to_children(&group.children),
            );
        }
        for segment in &source.segments {
            let children = segment
                .fields
                .iter()
                .map(|f| ChildDef {
                    name: f.name.clone(),
                    long_name: Some(f.long_name.clone()),
                    kind: StructureKind::Field,
                    cardinality: Cardinality::new(f.min, f.max),
                    data_type: Some(f.data_type.clone()),
                })
                .collect();
            segment_children.insert(segment.name.clone(), children);
        }
        for datatype in &source.datatypes {
            if datatype.base {
                let pattern = match &datatype.pattern {
                    Some(p) => Some(regex::Regex::new(p).map_err(|e| {
                        Error::InvalidFormat(format!(
                            "bad pattern for data type {}: {e}",
                            datatype.code
                        ))
                    })?),
                    None => None,
                };
                base_types.insert(
                    datatype.code.clone(),
                    BaseConstraints {
                        max_length: datatype.max_length,
                        pattern,
                        charset: datatype.charset.clone(),
                    },
                );
            }
            let children = datatype
                .components
                .iter()
                .map(|c| ChildDef {
                    name: c.name.clone(),
                    long_name: Some(c.long_name.clone()),
                    kind: StructureKind::Component,
                    cardinality: Cardinality::OPTIONAL,
                    data_type: Some(c.data_type.clone()),
                })
                .collect();
            datatype_children.insert(datatype.code.clone(), children);
        }

        Ok(Self {
            version,
            source,
            message_children,
            group_children,
            segment_children,
            datatype_children,
            base_types,
        })
    }
}

fn structure_slots_to_children(slots: &[crate::model::StructureSlot]) -> Vec<ChildDef> {
    slots
        .iter()
        .map(|s| ChildDef {
            name: s.name.clone(),
            long_name: None,
            kind: if s.group {
                StructureKind::Group
            } else {
                StructureKind::Segment
            },
            cardinality: Cardinality::new(s.min, s.max),
            data_type: None,
        })
        .collect()
}

/// How a raw name dissects against the version tables
enum Resolution<'a> {
    Message,
    Group,
    Segment,
    /// A field slot of a known segment
    Field(&'a ChildDef),
    /// A component slot of a known composite data type
    TypeChild(&'a ChildDef),
    Unknown,
}

/// Handle onto one version's immutable schema tables
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    schema: Arc<VersionSchema>,
}

impl SchemaRegistry {
    /// Obtain the registry for a version, loading and caching its tables on
    /// first use
    pub fn for_version(version: Version) -> Result<Self> {
        Ok(Self {
            schema: loader::load_version(version)?,
        })
    }

    /// Registry for `version` with a custom profile overlaid (Z-segments,
    /// constrained structures). The result is independent of the shared
    /// per-version cache.
    pub fn with_profile_file(version: Version, path: &std::path::Path) -> Result<Self> {
        Ok(Self {
            schema: loader::load_with_profile_file(version, path)?,
        })
    }

    /// Like [`SchemaRegistry::with_profile_file`], from a JSON string
    pub fn with_profile_json(version: Version, json: &str) -> Result<Self> {
        Ok(Self {
            schema: loader::load_with_profile_json(version, json)?,
        })
    }

    /// Like [`SchemaRegistry::with_profile_file`], from a YAML string
    pub fn with_profile_yaml(version: Version, yaml: &str) -> Result<Self> {
        Ok(Self {
            schema: loader::load_with_profile_yaml(version, yaml)?,
        })
    }

    pub fn version(&self) -> Version {
        self.schema.version
    }

    fn dissect(&self, name: &str) -> Resolution<'_> {
        let s = &self.schema;
        if s.message_children.contains_key(name) {
            return Resolution::Message;
        }
        if s.group_children.contains_key(name) {
            return Resolution::Group;
        }
        if s.segment_children.contains_key(name) {
            return Resolution::Segment;
        }

        let parts: Vec<&str> = name.split('_').collect();
        match parts.len() {
            2 => {
                let (prefix, index) = (parts[0], parts[1]);
                let Ok(index) = index.parse::<usize>() else {
                    return Resolution::Unknown;
                };
                if index == 0 {
                    return Resolution::Unknown;
                }
                if let Some(fields) = s.segment_children.get(prefix) {
                    return match fields.get(index - 1) {
                        Some(slot) => Resolution::Field(slot),
                        None => Resolution::Unknown,
                    };
                }
                if let Some(components) = s.datatype_children.get(prefix) {
                    return match components.get(index - 1) {
                        Some(slot) => Resolution::TypeChild(slot),
                        None => Resolution::Unknown,
                    };
                }
                Resolution::Unknown
            }
            // Aliased component form <SEGMENT>_<n>_<m>, e.g. PID_5_1
            3 => {
                let Ok(field_index) = parts[1].parse::<usize>() else {
                    return Resolution::Unknown;
                };
                let Ok(component_index) = parts[2].parse::<usize>() else {
                    return Resolution::Unknown;
                };
                if field_index == 0 || component_index == 0 {
                    return Resolution::Unknown;
                }
                let Some(fields) = s.segment_children.get(parts[0]) else {
                    return Resolution::Unknown;
                };
                let Some(field) = fields.get(field_index - 1) else {
                    return Resolution::Unknown;
                };
                let Some(data_type) = field.data_type.as_deref() else {
                    return Resolution::Unknown;
                };
                match s
                    .datatype_children
                    .get(data_type)
                    .and_then(|components| components.get(component_index - 1))
                {
                    Some(slot) => Resolution::TypeChild(slot),
                    None => Resolution::Unknown,
                }
            }
            _ => Resolution::Unknown,
        }
    }

    /// Resolve a name to its kind, canonical form, and data type
    ///
    /// Accepts any case; aliased component names (`PID_5_1`) resolve to their
    /// canonical data-type form (`XPN_1`). Component names are reported as
    /// [`StructureKind::Component`]; whether such a name denotes a component
    /// or a subcomponent depends on the nesting depth at the use site.
    pub fn lookup_structure(&self, name: &str) -> StructureInfo {
        let upper = name.to_ascii_uppercase();
        match self.dissect(&upper) {
            Resolution::Message => StructureInfo {
                name: upper,
                kind: StructureKind::Message,
                data_type: None,
                long_name: None,
            },
            Resolution::Group => StructureInfo {
                name: upper,
                kind: StructureKind::Group,
                data_type: None,
                long_name: None,
            },
            Resolution::Segment => StructureInfo {
                name: upper,
                kind: StructureKind::Segment,
                data_type: None,
                long_name: None,
            },
            Resolution::Field(slot) => StructureInfo {
                name: slot.name.clone(),
                kind: StructureKind::Field,
                data_type: slot.data_type.clone(),
                long_name: slot.long_name.clone(),
            },
            Resolution::TypeChild(slot) => StructureInfo {
                name: slot.name.clone(),
                kind: StructureKind::Component,
                data_type: slot.data_type.clone(),
                long_name: slot.long_name.clone(),
            },
            Resolution::Unknown => StructureInfo::unknown(&upper),
        }
    }

    /// The ordered child slots of a structure, or `None` when the name does
    /// not resolve or resolves to a scalar
    ///
    /// For message/group names the slots are segments and groups; for
    /// segments, fields; for field and component names, the components of
    /// their data type (empty for base types).
    pub fn children_of(&self, parent: &str) -> Option<&[ChildDef]> {
        let upper = parent.to_ascii_uppercase();
        let s = &self.schema;
        if let Some(children) = s.message_children.get(&upper) {
            return Some(children);
        }
        if let Some(children) = s.group_children.get(&upper) {
            return Some(children);
        }
        if let Some(children) = s.segment_children.get(&upper) {
            return Some(children);
        }
        if let Some(children) = s.datatype_children.get(&upper) {
            return Some(children);
        }
        match self.dissect(&upper) {
            Resolution::Field(slot) | Resolution::TypeChild(slot) => slot
                .data_type
                .as_deref()
                .and_then(|code| s.datatype_children.get(code))
                .map(Vec::as_slice),
            _ => None,
        }
    }

    /// The data type code of a field or component name
    pub fn data_type_of(&self, name: &str) -> Option<String> {
        let upper = name.to_ascii_uppercase();
        match self.dissect(&upper) {
            Resolution::Field(slot) | Resolution::TypeChild(slot) => slot.data_type.clone(),
            _ => None,
        }
    }

    /// Whether a data type code denotes a base (scalar) type
    pub fn is_base(&self, code: &str) -> bool {
        self.schema
            .base_types
            .contains_key(&code.to_ascii_uppercase())
    }

    /// Length/pattern/charset constraints of a base type
    pub fn base_constraints(&self, code: &str) -> Option<&BaseConstraints> {
        self.schema.base_types.get(&code.to_ascii_uppercase())
    }

    /// Resolve a case-insensitive long name to the child's schema key
    pub fn resolve_long_name(&self, parent: &str, long_name: &str) -> Option<String> {
        let children = self.children_of(parent)?;
        children
            .iter()
            .find(|c| {
                c.long_name
                    .as_deref()
                    .is_some_and(|l| l.eq_ignore_ascii_case(long_name))
            })
            .map(|c| c.name.clone())
    }

    /// The cardinality of a named child slot under `parent`
    pub fn child_cardinality(&self, parent: &str, child: &str) -> Option<Cardinality> {
        let upper = child.to_ascii_uppercase();
        self.children_of(parent)?
            .iter()
            .find(|c| c.name == upper)
            .map(|c| c.cardinality)
    }

    /// The transitive set of segment names reachable inside a group
    pub fn group_segment_set(&self, group: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![group.to_ascii_uppercase()];
        while let Some(name) = stack.pop() {
            let Some(children) = self.schema.group_children.get(&name) else {
                continue;
            };
            for child in children {
                match child.kind {
                    StructureKind::Group => stack.push(child.name.clone()),
                    _ => {
                        if !out.contains(&child.name) {
                            out.push(child.name.clone());
                        }
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::for_version(Version::V2_5).unwrap()
    }

    #[test]
    fn test_version_round_trip() {
        for v in Version::ALL {
            assert_eq!(v.as_str().parse::<Version>().unwrap(), v);
        }
    }

    #[test]
    fn test_version_unsupported() {
        let err = "2.7".parse::<Version>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(_)));
    }

    #[test]
    fn test_lookup_message_and_segment() {
        let reg = registry();
        assert_eq!(reg.lookup_structure("ADT_A01").kind, StructureKind::Message);
        assert_eq!(reg.lookup_structure("pid").kind, StructureKind::Segment);
        assert_eq!(
            reg.lookup_structure("ADT_A01_INSURANCE").kind,
            StructureKind::Group
        );
    }

    #[test]
    fn test_lookup_field() {
        let reg = registry();
        let info = reg.lookup_structure("PID_5");
        assert_eq!(info.kind, StructureKind::Field);
        assert_eq!(info.data_type.as_deref(), Some("XPN"));
        assert_eq!(info.long_name.as_deref(), Some("patient_name"));
    }

    #[test]
    fn test_lookup_component_alias() {
        let reg = registry();
        let canonical = reg.lookup_structure("XPN_2");
        let aliased = reg.lookup_structure("pid_5_2");
        assert_eq!(canonical.kind, StructureKind::Component);
        assert_eq!(aliased.kind, StructureKind::Component);
        assert_eq!(aliased.name, "XPN_2");
        assert_eq!(aliased.data_type, canonical.data_type);
    }

    #[test]
    fn test_lookup_unknown() {
        let reg = registry();
        assert_eq!(reg.lookup_structure("ZZZ").kind, StructureKind::Unknown);
        assert_eq!(reg.lookup_structure("PID_99").kind, StructureKind::Unknown);
        assert_eq!(reg.lookup_structure("PID_0").kind, StructureKind::Unknown);
    }

    #[test]
    fn test_children_of_segment_ordered() {
        let reg = registry();
        let fields = reg.children_of("PID").unwrap();
        assert_eq!(fields[0].name, "PID_1");
        assert_eq!(fields[4].name, "PID_5");
        assert!(fields[4].cardinality.is_unbounded());
    }

    #[test]
    fn test_children_of_field_are_type_components() {
        let reg = registry();
        let components = reg.children_of("PID_5").unwrap();
        assert_eq!(components[0].name, "XPN_1");
        assert!(reg.children_of("PID_1").unwrap().is_empty());
    }

    #[test]
    fn test_base_constraints() {
        let reg = registry();
        assert!(reg.is_base("ST"));
        assert!(!reg.is_base("XPN"));
        let st = reg.base_constraints("ST").unwrap();
        assert_eq!(st.max_length, Some(200));
        let nm = reg.base_constraints("NM").unwrap();
        assert!(nm.pattern.as_ref().unwrap().is_match("-12.5"));
        assert!(!nm.pattern.as_ref().unwrap().is_match("abc"));
    }

    #[test]
    fn test_resolve_long_name() {
        let reg = registry();
        assert_eq!(
            reg.resolve_long_name("PID", "Patient_Name").as_deref(),
            Some("PID_5")
        );
        assert_eq!(reg.resolve_long_name("PID", "nonexistent"), None);
    }

    #[test]
    fn test_child_cardinality() {
        let reg = registry();
        let msh = reg.child_cardinality("ADT_A01", "MSH").unwrap();
        assert_eq!(msh, Cardinality::REQUIRED);
        let nk1 = reg.child_cardinality("ADT_A01", "NK1").unwrap();
        assert!(nk1.is_unbounded());
    }

    #[test]
    fn test_group_segment_set() {
        let reg = registry();
        let set = reg.group_segment_set("ADT_A01_INSURANCE");
        assert!(set.contains(&"IN1".to_string()));
        assert!(set.contains(&"IN3".to_string()));
    }

    #[test]
    fn test_registry_shared_across_handles() {
        let a = registry();
        let b = registry();
        assert!(Arc::ptr_eq(&a.schema, &b.schema));
    }
}
