//! ER7 printer
//!
//! Tree to text. Positions come from the trailing index of each child's
//! schema key, so sparsely populated segments print with the right number of
//! empty fields; repetitions are same-named siblings joined with the
//! repetition separator. Trailing empties are trimmed per segment and per
//! composite, which makes the printer the exact inverse of the parser on
//! canonical forms.

use crate::element::{Element, ElementKind};
use crate::er7::syntax::{Delimiters, SEGMENT_TERMINATOR};

/// Serialise a subtree under the given delimiter set
pub(crate) fn encode(element: &Element, delimiters: &Delimiters) -> String {
    match element.kind() {
        ElementKind::Message | ElementKind::Group => {
            let mut segments = Vec::new();
            collect_segments(element, &mut segments);
            let mut out = String::new();
            for segment in segments {
                out.push_str(&encode_segment(segment, delimiters));
                out.push(SEGMENT_TERMINATOR as char);
            }
            out
        }
        ElementKind::Segment => encode_segment(element, delimiters),
        ElementKind::Field => encode_field(element, delimiters),
        ElementKind::Component => encode_component(element, delimiters),
        ElementKind::SubComponent => delimiters.encode(element.value().unwrap_or("")),
    }
}

/// Flatten groups into their segments, preserving wire order
fn collect_segments<'a>(element: &'a Element, out: &mut Vec<&'a Element>) {
    for child in element.children() {
        match child.kind() {
            ElementKind::Segment => out.push(child),
            ElementKind::Group => collect_segments(child, out),
            _ => {}
        }
    }
}

/// The 1-based position encoded in a schema key's trailing index
fn name_index(name: Option<&str>) -> Option<usize> {
    name?.rsplit('_').next()?.parse().ok()
}

fn encode_segment(segment: &Element, delimiters: &Delimiters) -> String {
    let name = segment.name().unwrap_or("");
    let is_msh = name == "MSH";
    let field_sep = delimiters.field as char;

    let mut slots: Vec<Option<String>> = Vec::new();
    let mut last_pos = 0usize;
    for child in segment.children() {
        let pos = name_index(child.name()).unwrap_or(last_pos + 1).max(1);
        if is_msh && pos <= 2 {
            // MSH-1 and MSH-2 are emitted from the delimiter set itself
            last_pos = last_pos.max(pos);
            continue;
        }
        while slots.len() < pos {
            slots.push(None);
        }
        let encoded = encode_field(child, delimiters);
        match &mut slots[pos - 1] {
            Some(existing) => {
                existing.push(delimiters.repetition as char);
                existing.push_str(&encoded);
            }
            vacant => *vacant = Some(encoded),
        }
        last_pos = last_pos.max(pos);
    }

    let skip = if is_msh { 2.min(slots.len()) } else { 0 };
    let mut rendered: Vec<String> = slots
        .into_iter()
        .skip(skip)
        .map(Option::unwrap_or_default)
        .collect();
    while rendered.last().is_some_and(String::is_empty) {
        rendered.pop();
    }

    let mut out = String::new();
    if is_msh {
        out.push_str("MSH");
        out.push(field_sep);
        out.push_str(&delimiters.encoding_chars());
    } else {
        out.push_str(name);
    }
    for field in rendered {
        out.push(field_sep);
        out.push_str(&field);
    }
    out
}

fn encode_field(field: &Element, delimiters: &Delimiters) -> String {
    if field.children().is_empty() {
        return delimiters.encode(field.value().unwrap_or(""));
    }
    encode_positional(
        field.children(),
        delimiters,
        delimiters.component,
        encode_component,
    )
}

fn encode_component(component: &Element, delimiters: &Delimiters) -> String {
    if component.children().is_empty() {
        return delimiters.encode(component.value().unwrap_or(""));
    }
    encode_positional(
        component.children(),
        delimiters,
        delimiters.subcomponent,
        |sub, d| d.encode(sub.value().unwrap_or("")),
    )
}

/// Join children by their name-derived positions; duplicates and anonymous
/// children take the next free position
fn encode_positional(
    children: &[Element],
    delimiters: &Delimiters,
    separator: u8,
    encode_child: fn(&Element, &Delimiters) -> String,
) -> String {
    let mut slots: Vec<Option<String>> = Vec::new();
    let mut last_pos = 0usize;
    for child in children {
        let mut pos = name_index(child.name()).unwrap_or(last_pos + 1).max(1);
        while slots.len() < pos {
            slots.push(None);
        }
        if slots[pos - 1].is_some() {
            pos = slots.len() + 1;
            slots.push(None);
        }
        slots[pos - 1] = Some(encode_child(child, delimiters));
        last_pos = last_pos.max(pos);
    }
    let mut rendered: Vec<String> = slots.into_iter().map(Option::unwrap_or_default).collect();
    while rendered.last().is_some_and(String::is_empty) {
        rendered.pop();
    }
    rendered.join(&((separator as char).to_string()))
}
