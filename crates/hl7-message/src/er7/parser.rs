//! ER7 parser
//!
//! Text to tree: delimiters come from the MSH header, segments split on the
//! record terminator, and each segment splits on the field, repetition,
//! component, and subcomponent separators. Whether a field or component
//! decomposes further is decided by its schema data type; unknown structure
//! splits by the separators alone and stays anonymous. With `find_groups`
//! enabled, segments are folded into their schema-defined groups by a
//! greedy left-to-right walk over the message structure.

use crate::element::{Element, ElementKind, ValidationLevel};
use crate::er7::syntax::Delimiters;
use crate::{Error, Result};
use hl7_schema::{ChildDef, SchemaRegistry, StructureKind, Version};
use tracing::debug;

/// Options accepted by [`parse_message`]
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Fixed version; inferred from MSH-12 when absent
    pub version: Option<Version>,
    /// Validation discipline for the resulting tree
    pub validation: ValidationLevel,
    /// Fold segments into schema-defined groups
    pub find_groups: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            version: None,
            validation: ValidationLevel::Lenient,
            find_groups: true,
        }
    }
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub fn validation(mut self, validation: ValidationLevel) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub fn find_groups(mut self, find_groups: bool) -> Self {
        self.find_groups = find_groups;
        self
    }
}

/// Parse a complete ER7 message
pub fn parse_message(text: &str, options: &ParseOptions) -> Result<Element> {
    let text = text.trim_end_matches(['\r', '\n']);
    if !text.starts_with("MSH") {
        return Err(Error::Parse {
            index: 0,
            message: "message must begin with an MSH segment".to_string(),
        });
    }
    let delimiters = Delimiters::from_msh_prefix(text.as_bytes())?;
    let lines: Vec<&str> = text
        .split(['\r', '\n'])
        .filter(|l| !l.is_empty())
        .collect();

    let version = match options.version {
        Some(v) => v,
        None => infer_version(lines[0], &delimiters)?,
    };
    let validation = options.validation;
    let registry = SchemaRegistry::for_version(version)?;
    let structure = msh9_structure(lines[0], &delimiters);
    debug!(
        version = version.as_str(),
        structure = structure.as_deref().unwrap_or("<unknown>"),
        "parsing message"
    );

    let mut root = match &structure {
        Some(name) => Element::message_shell(name, version, validation)?,
        None => Element::anonymous_message(version, validation)?,
    };
    root.repoint(version, validation, delimiters);

    let mut segments = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        segments.push(parse_segment_at(line, &delimiters, version, validation, index)?);
    }

    let slots = structure
        .as_deref()
        .filter(|_| options.find_groups)
        .and_then(|name| {
            let info = registry.lookup_structure(name);
            (info.kind == StructureKind::Message)
                .then(|| registry.children_of(name).map(<[ChildDef]>::to_vec))
                .flatten()
        });

    match slots {
        Some(slots) => {
            let mut matcher = GroupMatcher::new(&registry, slots, version, validation);
            let mut out = Vec::new();
            for segment in segments {
                if let Err(unplaced) = matcher.place(segment, &mut out) {
                    if validation.is_strict() {
                        return Err(Error::ChildNotValid {
                            parent: root
                                .name()
                                .unwrap_or("<anonymous Message>")
                                .to_string(),
                            child: unplaced.name().unwrap_or("<anonymous>").to_string(),
                        });
                    }
                    matcher.finish(&mut out);
                    out.push(unplaced);
                }
            }
            matcher.finish(&mut out);
            root.children = out;
        }
        None => root.children = segments,
    }

    root.repoint(version, validation, delimiters);
    Ok(root)
}

/// Parse one segment of ER7 text
pub fn parse_segment(
    text: &str,
    delimiters: &Delimiters,
    version: Version,
    validation: ValidationLevel,
) -> Result<Element> {
    parse_segment_at(text, delimiters, version, validation, 0)
}

fn parse_segment_at(
    raw: &str,
    delimiters: &Delimiters,
    version: Version,
    validation: ValidationLevel,
    index: usize,
) -> Result<Element> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    let Some(name) = raw.get(..3) else {
        return Err(Error::Parse {
            index,
            message: "segment shorter than a segment name".to_string(),
        });
    };
    if !name
        .bytes()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        return Err(Error::InvalidName(name.to_string()));
    }

    let registry = SchemaRegistry::for_version(version)?;
    let mut segment = Element::segment(name, version, validation)?;

    if name == "MSH" {
        // The header declares its own delimiters; fields one and two hold
        // the separator and the encoding characters literally.
        let own = Delimiters::from_msh_prefix(raw.as_bytes())?;
        let mut msh_1 = Element::field("MSH_1", version, validation)?;
        msh_1.set_raw_value(&((own.field as char).to_string()));
        let mut msh_2 = Element::field("MSH_2", version, validation)?;
        msh_2.set_raw_value(&own.encoding_chars());
        segment.push_adopted(msh_1);
        segment.push_adopted(msh_2);

        if raw.len() > 9 {
            let body = &raw[9..];
            let mut tokens: Vec<&str> = body.split(own.field as char).collect();
            while tokens.last() == Some(&"") {
                tokens.pop();
            }
            for (i, token) in tokens.iter().enumerate() {
                let field_name = format!("MSH_{}", i + 3);
                push_field_repetitions(
                    &mut segment,
                    &field_name,
                    token,
                    &registry,
                    &own,
                    version,
                    validation,
                )?;
            }
        }
        segment.repoint(version, validation, own);
        return Ok(segment);
    }

    if raw.len() > 3 && raw.as_bytes()[3] != delimiters.field {
        return Err(Error::Parse {
            index,
            message: format!("expected field separator after segment name {name}"),
        });
    }
    if raw.len() > 4 {
        let body = &raw[4..];
        let mut tokens: Vec<&str> = body.split(delimiters.field as char).collect();
        while tokens.last() == Some(&"") {
            tokens.pop();
        }
        for (i, token) in tokens.iter().enumerate() {
            let field_name = format!("{}_{}", name, i + 1);
            push_field_repetitions(
                &mut segment,
                &field_name,
                token,
                &registry,
                delimiters,
                version,
                validation,
            )?;
        }
    }
    segment.repoint(version, validation, *delimiters);
    Ok(segment)
}

#[allow(clippy::too_many_arguments)]
fn push_field_repetitions(
    segment: &mut Element,
    field_name: &str,
    token: &str,
    registry: &SchemaRegistry,
    delimiters: &Delimiters,
    version: Version,
    validation: ValidationLevel,
) -> Result<()> {
    let mut repetitions: Vec<&str> = token.split(delimiters.repetition as char).collect();
    while repetitions.len() > 1 && repetitions.last() == Some(&"") {
        repetitions.pop();
    }
    for repetition in repetitions {
        let field = build_field(
            Some(field_name),
            repetition,
            registry,
            delimiters,
            version,
            validation,
        )?;
        segment.push_adopted(field);
    }
    Ok(())
}

/// Parse one field of ER7 text; `name` may be `None` for an anonymous field
pub fn parse_field(
    text: &str,
    name: Option<&str>,
    delimiters: &Delimiters,
    version: Version,
    validation: ValidationLevel,
) -> Result<Element> {
    let registry = SchemaRegistry::for_version(version)?;
    build_field(name, text, &registry, delimiters, version, validation)
}

/// Parse one component of ER7 text; `name` may be `None` for an anonymous
/// component
pub fn parse_component(
    text: &str,
    name: Option<&str>,
    delimiters: &Delimiters,
    version: Version,
    validation: ValidationLevel,
) -> Result<Element> {
    let registry = SchemaRegistry::for_version(version)?;
    build_component(
        name,
        text,
        ElementKind::Component,
        &registry,
        delimiters,
        version,
        validation,
    )
}

fn build_field(
    name: Option<&str>,
    raw: &str,
    registry: &SchemaRegistry,
    delimiters: &Delimiters,
    version: Version,
    validation: ValidationLevel,
) -> Result<Element> {
    let mut field = match name {
        Some(n) => Element::field(n, version, validation)?,
        None => Element::anonymous(ElementKind::Field, version, validation)?,
    };
    field.repoint(version, validation, *delimiters);
    if raw.is_empty() {
        return Ok(field);
    }

    let composite = match field.data_type() {
        Some(dt) => !registry.is_base(dt),
        None => {
            raw.as_bytes().contains(&delimiters.component)
                || raw.as_bytes().contains(&delimiters.subcomponent)
        }
    };
    if !composite {
        let decoded = delimiters.decode(raw);
        if validation.is_strict() {
            field.check_scalar(&decoded)?;
        }
        field.set_raw_value(&decoded);
        return Ok(field);
    }

    let mut components: Vec<&str> = raw.split(delimiters.component as char).collect();
    while components.len() > 1 && components.last() == Some(&"") {
        components.pop();
    }
    let slots = field
        .name()
        .and_then(|n| registry.children_of(n))
        .map(<[ChildDef]>::to_vec)
        .unwrap_or_default();
    for (i, component_raw) in components.iter().enumerate() {
        let slot_name = slots.get(i).map(|s| s.name.clone());
        if slot_name.is_none() && !slots.is_empty() && validation.is_strict() {
            return Err(Error::ChildNotValid {
                parent: field.name().unwrap_or("<anonymous>").to_string(),
                child: format!("component {}", i + 1),
            });
        }
        let component = build_component(
            slot_name.as_deref(),
            component_raw,
            ElementKind::Component,
            registry,
            delimiters,
            version,
            validation,
        )?;
        field.push_adopted(component);
    }
    Ok(field)
}

#[allow(clippy::too_many_arguments)]
fn build_component(
    name: Option<&str>,
    raw: &str,
    kind: ElementKind,
    registry: &SchemaRegistry,
    delimiters: &Delimiters,
    version: Version,
    validation: ValidationLevel,
) -> Result<Element> {
    let mut component = match (name, kind) {
        (Some(n), ElementKind::SubComponent) => Element::subcomponent(n, version, validation)?,
        (Some(n), _) => Element::component(n, version, validation)?,
        (None, k) => Element::anonymous(k, version, validation)?,
    };
    component.repoint(version, validation, *delimiters);
    if raw.is_empty() {
        return Ok(component);
    }

    let composite = kind == ElementKind::Component
        && match component.data_type() {
            Some(dt) => !registry.is_base(dt),
            None => raw.as_bytes().contains(&delimiters.subcomponent),
        };
    if !composite {
        let decoded = delimiters.decode(raw);
        if validation.is_strict() {
            component.check_scalar(&decoded)?;
        }
        component.set_raw_value(&decoded);
        return Ok(component);
    }

    let mut subcomponents: Vec<&str> = raw.split(delimiters.subcomponent as char).collect();
    while subcomponents.len() > 1 && subcomponents.last() == Some(&"") {
        subcomponents.pop();
    }
    let slots = component
        .name()
        .and_then(|n| registry.children_of(n))
        .map(<[ChildDef]>::to_vec)
        .unwrap_or_default();
    for (i, sub_raw) in subcomponents.iter().enumerate() {
        let slot_name = slots.get(i).map(|s| s.name.clone());
        if slot_name.is_none() && !slots.is_empty() && validation.is_strict() {
            return Err(Error::ChildNotValid {
                parent: component.name().unwrap_or("<anonymous>").to_string(),
                child: format!("subcomponent {}", i + 1),
            });
        }
        let sub = build_component(
            slot_name.as_deref(),
            sub_raw,
            ElementKind::SubComponent,
            registry,
            delimiters,
            version,
            validation,
        )?;
        component.push_adopted(sub);
    }
    Ok(component)
}

fn msh_fields(msh_raw: &str, delimiters: &Delimiters) -> Vec<String> {
    if msh_raw.len() < 4 {
        return Vec::new();
    }
    msh_raw[4..]
        .split(delimiters.field as char)
        .map(str::to_string)
        .collect()
}

/// Infer the version from MSH-12 (first repetition, first component)
fn infer_version(msh_raw: &str, delimiters: &Delimiters) -> Result<Version> {
    let fields = msh_fields(msh_raw, delimiters);
    // fields[0] is MSH-2, so MSH-12 sits at offset 10
    let raw = fields.get(10).map(String::as_str).unwrap_or("");
    let first = raw
        .split(delimiters.repetition as char)
        .next()
        .unwrap_or("")
        .split(delimiters.component as char)
        .next()
        .unwrap_or("");
    first
        .parse::<Version>()
        .map_err(|_| Error::UnsupportedVersion(first.to_string()))
}

/// The message structure named by MSH-9: the explicit structure component,
/// or `CODE_TRIGGER`, or the bare code
fn msh9_structure(msh_raw: &str, delimiters: &Delimiters) -> Option<String> {
    let fields = msh_fields(msh_raw, delimiters);
    let raw = fields.get(7)?;
    let components: Vec<&str> = raw.split(delimiters.component as char).collect();
    let code = components.first().copied().unwrap_or("");
    let trigger = components.get(1).copied().unwrap_or("");
    let structure = components.get(2).copied().unwrap_or("");
    if !structure.is_empty() {
        Some(structure.to_ascii_uppercase())
    } else if !code.is_empty() && !trigger.is_empty() {
        Some(format!("{code}_{trigger}").to_ascii_uppercase())
    } else if !code.is_empty() {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}

/// Greedy left-to-right matcher assigning segments to schema slots
struct GroupMatcher<'r> {
    registry: &'r SchemaRegistry,
    slots: Vec<ChildDef>,
    pos: usize,
    used: usize,
    open: Option<Box<OpenGroup<'r>>>,
    version: Version,
    validation: ValidationLevel,
}

struct OpenGroup<'r> {
    slot: usize,
    element: Element,
    matcher: GroupMatcher<'r>,
}

impl<'r> GroupMatcher<'r> {
    fn new(
        registry: &'r SchemaRegistry,
        slots: Vec<ChildDef>,
        version: Version,
        validation: ValidationLevel,
    ) -> Self {
        Self {
            registry,
            slots,
            pos: 0,
            used: 0,
            open: None,
            version,
            validation,
        }
    }

    /// Place a segment, or hand it back when no slot from the cursor onward
    /// accepts it
    fn place(&mut self, seg: Element, out: &mut Vec<Element>) -> std::result::Result<(), Element> {
        let seg = match self.open.take() {
            Some(mut open) => match open.matcher.place(seg, &mut open.element.children) {
                Ok(()) => {
                    self.open = Some(open);
                    return Ok(());
                }
                Err(returned) => {
                    let slot = self.slots[open.slot].clone();
                    let restartable = slot.cardinality.accepts(self.used)
                        && returned.name().is_some_and(|n| {
                            self.registry
                                .group_segment_set(&slot.name)
                                .iter()
                                .any(|s| s == n)
                        });
                    open.matcher.finish(&mut open.element.children);
                    out.push(open.element);
                    if restartable {
                        self.used += 1;
                        return self.open_group(self.pos, returned);
                    }
                    returned
                }
            },
            None => seg,
        };
        self.scan(seg, out)
    }

    fn scan(&mut self, seg: Element, out: &mut Vec<Element>) -> std::result::Result<(), Element> {
        let Some(seg_name) = seg.name().map(str::to_string) else {
            return Err(seg);
        };
        for i in self.pos..self.slots.len() {
            let count_at = if i == self.pos { self.used } else { 0 };
            let slot = &self.slots[i];
            match slot.kind {
                StructureKind::Group => {
                    if slot.cardinality.accepts(count_at)
                        && self
                            .registry
                            .group_segment_set(&slot.name)
                            .iter()
                            .any(|s| s == &seg_name)
                    {
                        self.pos = i;
                        self.used = count_at + 1;
                        return self.open_group(i, seg);
                    }
                }
                _ => {
                    if slot.name == seg_name && slot.cardinality.accepts(count_at) {
                        self.pos = i;
                        self.used = count_at + 1;
                        out.push(seg);
                        return Ok(());
                    }
                }
            }
        }
        Err(seg)
    }

    fn open_group(&mut self, slot_index: usize, seg: Element) -> std::result::Result<(), Element> {
        let slot = self.slots[slot_index].clone();
        let Ok(element) = Element::group(&slot.name, self.version, self.validation) else {
            return Err(seg);
        };
        let inner_slots = self
            .registry
            .children_of(&slot.name)
            .map(<[ChildDef]>::to_vec)
            .unwrap_or_default();
        let mut matcher = GroupMatcher::new(self.registry, inner_slots, self.version, self.validation);
        let mut element = element;
        match matcher.place(seg, &mut element.children) {
            Ok(()) => {
                self.open = Some(Box::new(OpenGroup {
                    slot: slot_index,
                    element,
                    matcher,
                }));
                Ok(())
            }
            Err(seg) => Err(seg),
        }
    }

    fn finish(&mut self, out: &mut Vec<Element>) {
        if let Some(mut open) = self.open.take() {
            open.matcher.finish(&mut open.element.children);
            out.push(open.element);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADT: &str = "MSH|^~\\&|GHH_ADT||||20240201103000||ADT^A01^ADT_A01|MSG0001|P|2.5\rEVN|A01|20240201103000\rPID|1||12345^^^HOSP^MR||EVERYMAN^ADAM\rPV1|1|I\r";

    #[test]
    fn test_msh_declares_delimiters() {
        let message = parse_message(ADT, &ParseOptions::default()).unwrap();
        let d = message.delimiters();
        assert_eq!(d.field, b'|');
        assert_eq!(d.component, b'^');
        assert_eq!(d.subcomponent, b'&');
        assert_eq!(d.repetition, b'~');
        assert_eq!(d.escape, b'\\');
    }

    #[test]
    fn test_msh_special_fields() {
        let message = parse_message(ADT, &ParseOptions::default()).unwrap();
        assert_eq!(message.first("MSH/MSH_1").unwrap().unwrap().value(), Some("|"));
        assert_eq!(
            message.first("MSH/MSH_2").unwrap().unwrap().value(),
            Some("^~\\&")
        );
        assert_eq!(
            message.first("MSH/MSH_10").unwrap().unwrap().value(),
            Some("MSG0001")
        );
    }

    #[test]
    fn test_version_inferred_from_msh_12() {
        let message = parse_message(ADT, &ParseOptions::default()).unwrap();
        assert_eq!(message.version(), Version::V2_5);
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let text = ADT.replace("|2.5", "|9.9");
        let err = parse_message(&text, &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedVersion(_)));
    }

    #[test]
    fn test_explicit_version_skips_inference() {
        let text = ADT.replace("|2.5", "|9.9");
        let message = parse_message(
            &text,
            &ParseOptions::default().version(Version::V2_5),
        )
        .unwrap();
        assert_eq!(message.version(), Version::V2_5);
    }

    #[test]
    fn test_accepts_newline_terminators() {
        let unix = ADT.replace('\r', "\n");
        let dos = ADT.replace('\r', "\r\n");
        for text in [unix, dos] {
            let message = parse_message(&text, &ParseOptions::default()).unwrap();
            assert_eq!(message.get("PID").unwrap().len(), 1);
        }
    }

    #[test]
    fn test_rejects_non_msh_start() {
        let err = parse_message("PID|1|", &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_rejects_bad_encoding_chars() {
        let err = parse_message("MSH|^~\\|A|B", &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidEncodingChars(_)));
    }

    #[test]
    fn test_rejects_bad_segment_name() {
        let text = format!("{ADT}pid|1\r");
        let err = parse_message(&text, &ParseOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }

    #[test]
    fn test_composite_and_subcomponent_split() {
        let message = parse_message(ADT, &ParseOptions::default()).unwrap();
        assert_eq!(
            message.first("PID/PID_3/CX_1").unwrap().unwrap().value(),
            Some("12345")
        );
        // CX-4 is an HD composite, so HOSP lands in its first subcomponent
        assert_eq!(
            message.first("PID/PID_3/CX_4/HD_1").unwrap().unwrap().value(),
            Some("HOSP")
        );
    }

    #[test]
    fn test_field_repetitions() {
        let text = "MSH|^~\\&|A||||20240201||ADT^A01^ADT_A01|1|P|2.5\rEVN|A01|20240201\rPID|1||12345||EVERYMAN^ADAM|||M|||H1^^CITY~H2^^TOWN\rPV1|1|I\r";
        let message = parse_message(text, &ParseOptions::default()).unwrap();
        let reps = message.get("PID/PID_11").unwrap();
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[1].first("XAD_3").unwrap().unwrap().value(), Some("TOWN"));
    }

    #[test]
    fn test_inner_empties_kept_trailing_dropped() {
        let delimiters = Delimiters::default();
        let segment = parse_segment(
            "PID|1||A||B|||",
            &delimiters,
            Version::V2_5,
            ValidationLevel::Lenient,
        )
        .unwrap();
        // PID-6 through PID-8 were trailing empties and are gone
        let names: Vec<&str> = segment.children().iter().filter_map(Element::name).collect();
        assert_eq!(names, vec!["PID_1", "PID_2", "PID_3", "PID_4", "PID_5"]);
        assert!(segment.first("PID_2").unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_segment_lenient_vs_strict() {
        let text = format!("{ADT}ZBE|1|movement\r");
        let message = parse_message(&text, &ParseOptions::default()).unwrap();
        assert_eq!(
            message.first("ZBE/ZBE_1").unwrap().unwrap().value(),
            Some("1")
        );

        let err = parse_message(
            &text,
            &ParseOptions::default().validation(ValidationLevel::Strict),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }

    #[test]
    fn test_parse_field_scalar_and_composite() {
        let delimiters = Delimiters::default();
        let scalar = parse_field(
            "hello",
            Some("PID_19"),
            &delimiters,
            Version::V2_5,
            ValidationLevel::Lenient,
        )
        .unwrap();
        assert_eq!(scalar.value(), Some("hello"));

        let composite = parse_field(
            "EVERYMAN^ADAM",
            Some("PID_5"),
            &delimiters,
            Version::V2_5,
            ValidationLevel::Lenient,
        )
        .unwrap();
        assert_eq!(composite.children().len(), 2);
        assert_eq!(
            composite.first("XPN_2").unwrap().unwrap().value(),
            Some("ADAM")
        );
    }

    #[test]
    fn test_parse_field_anonymous() {
        let delimiters = Delimiters::default();
        let field = parse_field(
            "A^B",
            None,
            &delimiters,
            Version::V2_5,
            ValidationLevel::Lenient,
        )
        .unwrap();
        assert_eq!(field.name(), None);
        assert_eq!(field.children().len(), 2);
        assert_eq!(field.children()[0].name(), None);
    }

    #[test]
    fn test_parse_component_known_type() {
        let delimiters = Delimiters::default();
        let component = parse_component(
            "EVERYMAN",
            Some("XPN_1"),
            &delimiters,
            Version::V2_5,
            ValidationLevel::Lenient,
        )
        .unwrap();
        assert_eq!(
            component.first("FN_1").unwrap().unwrap().value(),
            Some("EVERYMAN")
        );
    }

    #[test]
    fn test_escaped_values_decoded() {
        let text = "MSH|^~\\&|A||||20240201||ADT^A01^ADT_A01|1|P|2.5\rEVN|A01|20240201\rPID|1||12345||SMITH\\S\\JONES^PAT\rPV1|1|I\r";
        let message = parse_message(text, &ParseOptions::default()).unwrap();
        assert_eq!(
            message.first("PID/PID_5/XPN_1/FN_1").unwrap().unwrap().value(),
            Some("SMITH^JONES")
        );
    }

    #[test]
    fn test_grouping_insurance() {
        let text = "MSH|^~\\&|A||||20240201||ADT^A01^ADT_A01|1|P|2.5\rEVN|A01|20240201\rPID|1||12345||EVERYMAN^ADAM\rPV1|1|I\rIN1|1|PLAN001|IC001\rIN2||123456789\rIN1|2|PLAN002|IC002\rACC|20240101|A^ACCIDENT\r";
        let message = parse_message(text, &ParseOptions::default()).unwrap();

        let insurance = message.get("ADT_A01_INSURANCE").unwrap();
        assert_eq!(insurance.len(), 2);
        assert_eq!(
            insurance[0].first("IN2/IN2_2").unwrap().unwrap().value(),
            Some("123456789")
        );
        assert_eq!(
            insurance[1].first("IN1/IN1_1").unwrap().unwrap().value(),
            Some("2")
        );
        // ACC follows the groups as a direct child
        assert_eq!(message.get("ACC").unwrap().len(), 1);
    }

    #[test]
    fn test_grouping_disabled_keeps_segments_flat() {
        let text = "MSH|^~\\&|A||||20240201||ADT^A01^ADT_A01|1|P|2.5\rEVN|A01|20240201\rPID|1||12345||EVERYMAN^ADAM\rPV1|1|I\rIN1|1|PLAN001|IC001\r";
        let message = parse_message(text, &ParseOptions::default().find_groups(false)).unwrap();
        assert!(message.get("ADT_A01_INSURANCE").unwrap().is_empty());
        let names: Vec<&str> = message.children().iter().filter_map(Element::name).collect();
        assert_eq!(names, vec!["MSH", "EVN", "PID", "PV1", "IN1"]);
    }

    #[test]
    fn test_grouping_nested_observations() {
        let text = "MSH|^~\\&|LAB||||20240201||ORU^R01^ORU_R01|1|P|2.5\rPID|1||12345\rOBR|1|||GLU^GLUCOSE\rOBX|1|NM|GLU^GLUCOSE||105||||||F\rNTE|1||FASTING\rOBX|2|NM|K^POTASSIUM||4.2||||||F\r";
        let message = parse_message(text, &ParseOptions::default()).unwrap();

        let observations = message
            .get("ORU_R01_PATIENT_RESULT/ORU_R01_ORDER_OBSERVATION/ORU_R01_OBSERVATION")
            .unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(
            observations[0].first("NTE/NTE_3").unwrap().unwrap().value(),
            Some("FASTING")
        );
        assert_eq!(
            observations[1].first("OBX/OBX_5").unwrap().unwrap().value(),
            Some("4.2")
        );
        assert_eq!(
            message
                .first("ORU_R01_PATIENT_RESULT/ORU_R01_PATIENT/PID/PID_3/CX_1")
                .unwrap()
                .unwrap()
                .value(),
            Some("12345")
        );
    }

    #[test]
    fn test_msh9_structure_fallbacks() {
        let d = Delimiters::default();
        assert_eq!(
            msh9_structure("MSH|^~\\&|A||||T||ADT^A01|1|P|2.5", &d).as_deref(),
            Some("ADT_A01")
        );
        assert_eq!(
            msh9_structure("MSH|^~\\&|A||||T||ACK|1|P|2.5", &d).as_deref(),
            Some("ACK")
        );
        assert_eq!(msh9_structure("MSH|^~\\&|A||||T|||1|P|2.5", &d), None);
    }
}
