//! Overlay merge logic
//!
//! Version tables ship as a shared base plus a small per-version overlay;
//! custom profiles overlay further. Overlay entries win; base entries fill
//! the gaps. Segment overlays merge at field level so a profile can redefine
//! a single field without restating the segment.

use crate::model::{SchemaFile, SegmentDef};
use std::collections::HashSet;

/// Merge `overlay` onto `base`, in place
pub(crate) fn apply_overlay(base: &mut SchemaFile, overlay: SchemaFile) {
    if overlay.version.is_some() {
        base.version = overlay.version;
    }

    for message in overlay.messages {
        match base.messages.iter_mut().find(|m| m.name == message.name) {
            Some(existing) => *existing = message,
            None => base.messages.push(message),
        }
    }

    for group in overlay.groups {
        match base.groups.iter_mut().find(|g| g.name == group.name) {
            Some(existing) => *existing = group,
            None => base.groups.push(group),
        }
    }

    for segment in overlay.segments {
        match base.segments.iter_mut().find(|s| s.name == segment.name) {
            Some(existing) => merge_segment(existing, segment),
            None => base.segments.push(segment),
        }
    }

    for datatype in overlay.datatypes {
        match base.datatypes.iter_mut().find(|d| d.code == datatype.code) {
            Some(existing) => *existing = datatype,
            None => base.datatypes.push(datatype),
        }
    }
}

/// Field-level merge: overlay fields replace same-named base fields, new
/// fields are appended, and the result is re-ordered by field index.
fn merge_segment(base: &mut SegmentDef, overlay: SegmentDef) {
    let overridden: HashSet<String> = overlay.fields.iter().map(|f| f.name.clone()).collect();
    base.fields.retain(|f| !overridden.contains(&f.name));
    base.fields.extend(overlay.fields);
    base.fields.sort_by_key(|f| field_index(&f.name));
}

fn field_index(name: &str) -> usize {
    name.rsplit('_')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}
