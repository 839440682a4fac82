//! Violation reporting
//!
//! The audit never stops at the first problem: every violation becomes a
//! [`ValidationIssue`] with a severity, a stable code, and the path of the
//! offending node, collected into a [`ValidationReport`].

/// Severity of a reported violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// Stable issue codes reported by the audit
pub mod codes {
    pub const INVALID_NAME: &str = "INVALID_NAME";
    pub const ANONYMOUS_ELEMENT: &str = "ANONYMOUS_ELEMENT";
    pub const CHILD_NOT_VALID: &str = "CHILD_NOT_VALID";
    pub const MISSING_REQUIRED_CHILD: &str = "MISSING_REQUIRED_CHILD";
    pub const MAX_CHILD_LIMIT_REACHED: &str = "MAX_CHILD_LIMIT_REACHED";
    pub const MAX_LENGTH_REACHED: &str = "MAX_LENGTH_REACHED";
    pub const INVALID_VALUE: &str = "INVALID_VALUE";
    pub const MISSING_MSH: &str = "MISSING_MSH";
    pub const INVALID_ENCODING_CHARS: &str = "INVALID_ENCODING_CHARS";
    pub const UNSUPPORTED_VERSION: &str = "UNSUPPORTED_VERSION";
}

/// One reported violation
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity level
    pub severity: Severity,

    /// Stable code from [`codes`]
    pub code: String,

    /// Human-readable description
    pub message: String,

    /// Path of the offending node (e.g. `ADT_A01/PID[0]/PID_5[0]`)
    pub path: String,

    /// Expected value or shape, where meaningful
    pub expected: Option<String>,

    /// Observed value, where meaningful
    pub actual: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: Severity, code: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.to_string(),
            message: message.into(),
            path: String::new(),
            expected: None,
            actual: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    #[must_use]
    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }
}

/// All violations found by one audit
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_issue(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// All issues, in discovery order
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    /// A tree is valid when the audit found no errors
    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    pub fn count(&self) -> usize {
        self.issues.len()
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_partitions_by_severity() {
        let mut report = ValidationReport::new();
        report.add_issue(ValidationIssue::new(
            Severity::Error,
            codes::INVALID_VALUE,
            "bad value",
        ));
        report.add_issue(ValidationIssue::new(
            Severity::Warning,
            codes::ANONYMOUS_ELEMENT,
            "anonymous node",
        ));

        assert_eq!(report.count(), 2);
        assert_eq!(report.count_by_severity(Severity::Error), 1);
        assert!(report.has_errors());
        assert!(!report.is_valid());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_issue_builders() {
        let issue = ValidationIssue::new(Severity::Error, codes::MAX_LENGTH_REACHED, "too long")
            .with_path("PID[0]/PID_19[0]")
            .with_expected("200")
            .with_actual("1000");
        assert_eq!(issue.path, "PID[0]/PID_19[0]");
        assert_eq!(issue.expected.as_deref(), Some("200"));
    }

    #[test]
    fn test_empty_report_is_valid() {
        let report = ValidationReport::new();
        assert!(report.is_valid());
        assert_eq!(report.count(), 0);
    }
}
