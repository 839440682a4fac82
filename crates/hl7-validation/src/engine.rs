//! The audit engine
//!
//! Walks a subtree and reports every violation against the version's schema
//! tables: unknown names, schema-illegal children, cardinality breaches,
//! base-type value violations (length, pattern, charset, calendar), and MSH
//! header integrity on messages. The walk never stops early; STRICT trees
//! catch most of these at mutation time, but the audit is the whole-tree
//! ground truth for both disciplines.

use crate::reporter::{codes, Severity, ValidationIssue, ValidationReport};
use crate::Result;
use chrono::NaiveDate;
use hl7_message::{Element, ElementKind};
use hl7_schema::{SchemaRegistry, StructureKind, Version};
use std::collections::HashMap;

/// Whole-tree audit against one version's schema tables
pub struct Validator {
    registry: SchemaRegistry,
}

impl Validator {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self { registry }
    }

    /// A validator over the shared tables for `version`
    pub fn for_version(version: Version) -> Result<Self> {
        Ok(Self {
            registry: SchemaRegistry::for_version(version)?,
        })
    }

    /// Audit a subtree, reporting all violations with node paths
    pub fn validate(&self, element: &Element) -> ValidationReport {
        let mut report = ValidationReport::new();
        let path = element.name().unwrap_or("<anonymous>").to_string();
        self.validate_node(element, &path, &mut report);
        if element.kind() == ElementKind::Message {
            self.check_msh_integrity(element, &path, &mut report);
        }
        report
    }

    fn validate_node(&self, node: &Element, path: &str, report: &mut ValidationReport) {
        match node.name() {
            Some(name) => {
                if self.registry.lookup_structure(name).kind == StructureKind::Unknown {
                    report.add_issue(
                        ValidationIssue::new(
                            Severity::Error,
                            codes::INVALID_NAME,
                            format!("'{name}' does not resolve in version {}", self.registry.version()),
                        )
                        .with_path(path),
                    );
                }
            }
            None => {
                report.add_issue(
                    ValidationIssue::new(
                        Severity::Warning,
                        codes::ANONYMOUS_ELEMENT,
                        "anonymous element",
                    )
                    .with_path(path),
                );
            }
        }

        if let Some(parent_name) = node.name() {
            if let Some(slots) = self.registry.children_of(parent_name) {
                let slots = slots.to_vec();
                for child in node.children() {
                    if let Some(child_name) = child.name() {
                        if !slots.iter().any(|s| s.name == child_name) {
                            report.add_issue(
                                ValidationIssue::new(
                                    Severity::Error,
                                    codes::CHILD_NOT_VALID,
                                    format!("'{child_name}' is not a valid child of '{parent_name}'"),
                                )
                                .with_path(path),
                            );
                        }
                    }
                }
                for slot in &slots {
                    let count = node
                        .children()
                        .iter()
                        .filter(|c| c.name() == Some(slot.name.as_str()))
                        .count();
                    if !slot.cardinality.is_unbounded()
                        && count > slot.cardinality.max.max(0) as usize
                    {
                        report.add_issue(
                            ValidationIssue::new(
                                Severity::Error,
                                codes::MAX_CHILD_LIMIT_REACHED,
                                format!(
                                    "'{}' occurs {count} times under '{parent_name}'",
                                    slot.name
                                ),
                            )
                            .with_path(path)
                            .with_expected(format!("at most {}", slot.cardinality.max))
                            .with_actual(count.to_string()),
                        );
                    }
                    if count < slot.cardinality.min {
                        report.add_issue(
                            ValidationIssue::new(
                                Severity::Error,
                                codes::MISSING_REQUIRED_CHILD,
                                format!(
                                    "'{}' requires at least {} occurrence(s) of '{}'",
                                    parent_name, slot.cardinality.min, slot.name
                                ),
                            )
                            .with_path(path)
                            .with_expected(format!("at least {}", slot.cardinality.min))
                            .with_actual(count.to_string()),
                        );
                    }
                }
            }
        }

        if let Some(value) = node.value() {
            self.check_value(node, value, path, report);
        }

        let mut repetition: HashMap<&str, usize> = HashMap::new();
        for child in node.children() {
            let child_path = match child.name() {
                Some(name) => {
                    let index = repetition.entry(name).or_insert(0);
                    let p = format!("{path}/{name}[{index}]");
                    *index += 1;
                    p
                }
                None => format!("{path}/<anonymous>"),
            };
            self.validate_node(child, &child_path, report);
        }
    }

    fn check_value(&self, node: &Element, value: &str, path: &str, report: &mut ValidationReport) {
        let Some(data_type) = node.data_type() else {
            return;
        };
        let Some(constraints) = self.registry.base_constraints(data_type) else {
            return;
        };
        if let Some(max) = constraints.max_length {
            let length = value.chars().count();
            if length > max {
                report.add_issue(
                    ValidationIssue::new(
                        Severity::Error,
                        codes::MAX_LENGTH_REACHED,
                        format!("value of {data_type} exceeds {max} characters"),
                    )
                    .with_path(path)
                    .with_expected(max.to_string())
                    .with_actual(length.to_string()),
                );
            }
        }
        if let Some(pattern) = &constraints.pattern {
            if !pattern.is_match(value) {
                report.add_issue(
                    ValidationIssue::new(
                        Severity::Error,
                        codes::INVALID_VALUE,
                        format!("value does not match the {data_type} shape"),
                    )
                    .with_path(path)
                    .with_actual(value.to_string()),
                );
                return;
            }
        }
        if let Some(charset) = &constraints.charset {
            if !value.chars().all(|c| charset.contains(c)) {
                report.add_issue(
                    ValidationIssue::new(
                        Severity::Error,
                        codes::INVALID_VALUE,
                        format!("value uses characters outside the {data_type} set"),
                    )
                    .with_path(path)
                    .with_actual(value.to_string()),
                );
                return;
            }
        }
        if !calendar_ok(data_type, value) {
            report.add_issue(
                ValidationIssue::new(
                    Severity::Error,
                    codes::INVALID_VALUE,
                    format!("{data_type} value is not a real calendar date or time"),
                )
                .with_path(path)
                .with_actual(value.to_string()),
            );
        }
    }

    fn check_msh_integrity(
        &self,
        message: &Element,
        path: &str,
        report: &mut ValidationReport,
    ) {
        let Some(msh) = message
            .children()
            .iter()
            .find(|c| c.name() == Some("MSH"))
        else {
            report.add_issue(
                ValidationIssue::new(
                    Severity::Error,
                    codes::MISSING_MSH,
                    "message has no MSH segment",
                )
                .with_path(path),
            );
            return;
        };
        let msh_path = format!("{path}/MSH[0]");
        let delimiters = message.delimiters();

        let field_sep = (delimiters.field as char).to_string();
        let msh_1 = scalar_of(msh, "MSH_1");
        if msh_1.as_deref() != Some(field_sep.as_str()) {
            report.add_issue(
                ValidationIssue::new(
                    Severity::Error,
                    codes::INVALID_ENCODING_CHARS,
                    "MSH-1 does not match the message field separator",
                )
                .with_path(msh_path.as_str())
                .with_expected(field_sep)
                .with_actual(msh_1.unwrap_or_default()),
            );
        }
        let encoding = delimiters.encoding_chars();
        let msh_2 = scalar_of(msh, "MSH_2");
        if msh_2.as_deref() != Some(encoding.as_str()) {
            report.add_issue(
                ValidationIssue::new(
                    Severity::Error,
                    codes::INVALID_ENCODING_CHARS,
                    "MSH-2 does not match the message encoding characters",
                )
                .with_path(msh_path.as_str())
                .with_expected(encoding)
                .with_actual(msh_2.unwrap_or_default()),
            );
        }

        let declared = scalar_of(msh, "MSH_12");
        let expected = message.version().as_str();
        if declared.as_deref() != Some(expected) {
            report.add_issue(
                ValidationIssue::new(
                    Severity::Error,
                    codes::UNSUPPORTED_VERSION,
                    "MSH-12 does not match the tree version",
                )
                .with_path(msh_path.as_str())
                .with_expected(expected)
                .with_actual(declared.unwrap_or_default()),
            );
        }
    }
}

/// The scalar content of a field: its own value, or the value of its first
/// component for single-valued composites
fn scalar_of(segment: &Element, field: &str) -> Option<String> {
    let field = segment
        .children()
        .iter()
        .find(|c| c.name() == Some(field))?;
    if let Some(value) = field.value() {
        return Some(value.to_string());
    }
    let first = field.children().first()?;
    if let Some(value) = first.value() {
        return Some(value.to_string());
    }
    first.children().first()?.value().map(str::to_string)
}

/// Calendar-level checks beyond the regex shape for date/time types
fn calendar_ok(code: &str, value: &str) -> bool {
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    match code {
        "DT" => date_part_ok(value, &digits),
        "DTM" => {
            let main = value
                .split_once(['+', '-'])
                .map(|(head, _)| head)
                .unwrap_or(value);
            let main = main.split_once('.').map(|(head, _)| head).unwrap_or(main);
            if !digits(main) {
                return true;
            }
            let date = &main[..main.len().min(8)];
            if !date_part_ok(date, &digits) {
                return false;
            }
            time_part_ok(main.get(8..).unwrap_or(""))
        }
        "TM" => {
            let main = value
                .split_once(['+', '-'])
                .map(|(head, _)| head)
                .unwrap_or(value);
            let main = main.split_once('.').map(|(head, _)| head).unwrap_or(main);
            time_part_ok(main)
        }
        _ => true,
    }
}

fn date_part_ok(value: &str, digits: &impl Fn(&str) -> bool) -> bool {
    if !digits(value) {
        return true;
    }
    match value.len() {
        4 => true,
        6 => matches!(value[4..6].parse::<u8>(), Ok(1..=12)),
        8 => NaiveDate::parse_from_str(value, "%Y%m%d").is_ok(),
        _ => true,
    }
}

fn time_part_ok(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let pairs = [(0, 24u8), (2, 60), (4, 60)];
    for (offset, bound) in pairs {
        let Some(part) = value.get(offset..offset + 2) else {
            break;
        };
        match part.parse::<u8>() {
            Ok(n) if n < bound => {}
            _ => return false,
        }
    }
    true
}

/// Whole-tree audit as a method on any element
pub trait Validate {
    /// Run the audit for this element's version
    fn validate(&self) -> Result<ValidationReport>;
}

impl Validate for Element {
    fn validate(&self) -> Result<ValidationReport> {
        Ok(Validator::for_version(self.version())?.validate(self))
    }
}
