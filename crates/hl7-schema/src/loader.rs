//! Version table and profile loading
//!
//! The embedded tables are a shared base file plus one small overlay per
//! version. The merged result is compiled once per version and cached for
//! the lifetime of the process; custom profiles overlay on top of the merged
//! tables and produce independent, uncached registries.

use crate::model::SchemaFile;
use crate::overlay::apply_overlay;
use crate::registry::{Version, VersionSchema};
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{debug, info, trace};

const BASE: &str = include_str!("../data/base.json");

fn overlay_source(version: Version) -> &'static str {
    match version {
        Version::V2_2 => include_str!("../data/v2_2.json"),
        Version::V2_3 => include_str!("../data/v2_3.json"),
        Version::V2_3_1 => include_str!("../data/v2_3_1.json"),
        Version::V2_4 => include_str!("../data/v2_4.json"),
        Version::V2_5 => include_str!("../data/v2_5.json"),
        Version::V2_5_1 => include_str!("../data/v2_5_1.json"),
        Version::V2_6 => include_str!("../data/v2_6.json"),
    }
}

fn cache() -> &'static RwLock<HashMap<Version, Arc<VersionSchema>>> {
    static CACHE: OnceLock<RwLock<HashMap<Version, Arc<VersionSchema>>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn parse_json(source: &str, what: &str) -> Result<SchemaFile> {
    serde_json::from_str(source)
        .map_err(|e| Error::InvalidFormat(format!("{what}: JSON parse error: {e}")))
}

fn parse_yaml(source: &str, what: &str) -> Result<SchemaFile> {
    serde_yaml::from_str(source)
        .map_err(|e| Error::InvalidFormat(format!("{what}: YAML parse error: {e}")))
}

/// Build the merged base-plus-overlay file for a version
fn merged_file(version: Version) -> Result<SchemaFile> {
    let mut file = parse_json(BASE, "embedded base table")?;
    let overlay = parse_json(overlay_source(version), version.as_str())?;
    trace!(version = version.as_str(), "applying version overlay");
    apply_overlay(&mut file, overlay);
    file.version = Some(version.as_str().to_string());
    Ok(file)
}

/// The cached, compiled tables for a version
pub(crate) fn load_version(version: Version) -> Result<Arc<VersionSchema>> {
    if let Some(schema) = cache()
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .get(&version)
    {
        debug!(version = version.as_str(), "schema cache hit");
        return Ok(Arc::clone(schema));
    }

    let compiled = Arc::new(VersionSchema::compile(version, merged_file(version)?)?);
    info!(version = version.as_str(), "loaded HL7 schema tables");

    let mut guard = cache()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    // Another thread may have raced the load; keep the first entry
    Ok(Arc::clone(
        guard.entry(version).or_insert(compiled),
    ))
}

fn overlay_profile(version: Version, profile: SchemaFile) -> Result<Arc<VersionSchema>> {
    let mut file = load_version(version)?.source.clone();
    apply_overlay(&mut file, profile);
    Ok(Arc::new(VersionSchema::compile(version, file)?))
}

/// Load a custom profile file (JSON or YAML, by extension) over a version
pub(crate) fn load_with_profile_file(
    version: Version,
    path: &Path,
) -> Result<Arc<VersionSchema>> {
    trace!(path = %path.display(), "loading custom profile");
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::NotFound(format!("{}: {e}", path.display())))?;
    let yaml = path
        .extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false);
    let profile = if yaml {
        parse_yaml(&content, &path.display().to_string())?
    } else {
        parse_json(&content, &path.display().to_string())?
    };
    overlay_profile(version, profile)
}

/// Load a custom profile from a JSON string over a version
pub(crate) fn load_with_profile_json(
    version: Version,
    json: &str,
) -> Result<Arc<VersionSchema>> {
    overlay_profile(version, parse_json(json, "profile")?)
}

/// Load a custom profile from a YAML string over a version
pub(crate) fn load_with_profile_yaml(
    version: Version,
    yaml: &str,
) -> Result<Arc<VersionSchema>> {
    overlay_profile(version, parse_yaml(yaml, "profile")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StructureKind;
    use crate::SchemaRegistry;
    use std::io::Write;

    #[test]
    fn test_all_embedded_versions_load() {
        for version in Version::ALL {
            let schema = load_version(version).unwrap();
            assert!(!schema.source.segments.is_empty(), "{version}");
        }
    }

    #[test]
    fn test_cache_returns_same_arc() {
        let a = load_version(Version::V2_4).unwrap();
        let b = load_version(Version::V2_4).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_version_overlay_changes_msh_7() {
        let v2_3 = SchemaRegistry::for_version(Version::V2_3).unwrap();
        let v2_5 = SchemaRegistry::for_version(Version::V2_5).unwrap();
        assert_eq!(v2_3.data_type_of("MSH_7").as_deref(), Some("TS"));
        assert_eq!(v2_5.data_type_of("MSH_7").as_deref(), Some("DTM"));
    }

    #[test]
    fn test_version_overlay_changes_msh_12() {
        let v2_2 = SchemaRegistry::for_version(Version::V2_2).unwrap();
        let v2_5 = SchemaRegistry::for_version(Version::V2_5).unwrap();
        assert_eq!(v2_2.data_type_of("MSH_12").as_deref(), Some("ID"));
        assert_eq!(v2_5.data_type_of("MSH_12").as_deref(), Some("VID"));
    }

    #[test]
    fn test_profile_json_adds_z_segment() {
        let profile = r#"
        {
            "segments": [
                {
                    "name": "ZBX",
                    "fields": [
                        {"name": "ZBX_1", "long_name": "site_code", "data_type": "ST"}
                    ]
                }
            ]
        }
        "#;
        let reg = SchemaRegistry::with_profile_json(Version::V2_5, profile).unwrap();
        assert_eq!(reg.lookup_structure("ZBX").kind, StructureKind::Segment);
        assert_eq!(reg.data_type_of("ZBX_1").as_deref(), Some("ST"));

        // The shared registry is untouched
        let plain = SchemaRegistry::for_version(Version::V2_5).unwrap();
        assert_eq!(plain.lookup_structure("ZBX").kind, StructureKind::Unknown);
    }

    #[test]
    fn test_profile_yaml() {
        let profile = "segments:\n  - name: ZAU\n    fields:\n      - name: ZAU_1\n        long_name: audit_id\n        data_type: ST\n";
        let reg = SchemaRegistry::with_profile_yaml(Version::V2_5, profile).unwrap();
        assert_eq!(reg.lookup_structure("ZAU").kind, StructureKind::Segment);
    }

    #[test]
    fn test_profile_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"segments": [{{"name": "ZPF", "fields": [{{"name": "ZPF_1", "long_name": "profile_flag", "data_type": "ID"}}]}}]}}"#
        )
        .unwrap();
        let reg = SchemaRegistry::with_profile_file(Version::V2_5, &path).unwrap();
        assert_eq!(reg.lookup_structure("ZPF").kind, StructureKind::Segment);
    }

    #[test]
    fn test_profile_missing_file() {
        let err =
            SchemaRegistry::with_profile_file(Version::V2_5, Path::new("/nonexistent.json"))
                .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_profile_invalid_json() {
        let err = SchemaRegistry::with_profile_json(Version::V2_5, "not json").unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }
}
