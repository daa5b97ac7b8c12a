//! Diagnostics raised while lowering a method.

use crate::span::{Label, Span};
use serde::{Deserialize, Serialize};

/// Severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Allocation report, only with `--report-allocations`
    Hint,
    /// Lowering succeeded but an edit cannot be applied to a running program
    Warning,
    /// The method was not lowered
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Hint => "hint",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic codes. The letter is the category: H for allocation hints,
/// E for edit-and-continue, I for internal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// A scope allocates a heap environment per activation
    EnvironmentAllocated,
    /// A function value is cached in a hoisted field or local
    DelegateCached,
    /// A previous closure or lambda identity could not be reused
    RudeEdit,
    /// Lowering reached a state well-formed input never produces
    InternalError,
    /// A captured environment is not reachable from its capturing function
    UnreachableEnvironment,
    /// An environment was assigned two different parents
    ConflictingEnvironmentParent,
    /// Environments selected for merging have different capturing functions
    EnvironmentMergeMismatch,
    /// A variable is referenced but no enclosing scope declares it
    UndeclaredVariable,
    /// A nested function is referenced but never declared
    UnknownNestedFunction,
    /// No frame pointer reaches a required environment
    UnreachableFrame,
}

impl DiagnosticCode {
    /// Every code, in numbering order.
    pub const ALL: [DiagnosticCode; 10] = [
        DiagnosticCode::EnvironmentAllocated,
        DiagnosticCode::DelegateCached,
        DiagnosticCode::RudeEdit,
        DiagnosticCode::InternalError,
        DiagnosticCode::UnreachableEnvironment,
        DiagnosticCode::ConflictingEnvironmentParent,
        DiagnosticCode::EnvironmentMergeMismatch,
        DiagnosticCode::UndeclaredVariable,
        DiagnosticCode::UnknownNestedFunction,
        DiagnosticCode::UnreachableFrame,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnvironmentAllocated => "H001",
            Self::DelegateCached => "H002",
            Self::RudeEdit => "E001",
            Self::InternalError => "I001",
            Self::UnreachableEnvironment => "I002",
            Self::ConflictingEnvironmentParent => "I003",
            Self::EnvironmentMergeMismatch => "I004",
            Self::UndeclaredVariable => "I005",
            Self::UnknownNestedFunction => "I006",
            Self::UnreachableFrame => "I007",
        }
    }

    /// Severity follows the category letter.
    pub fn default_severity(&self) -> Severity {
        match self.as_str().as_bytes()[0] {
            b'H' => Severity::Hint,
            b'E' => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Look up a code by its string form, ignoring case.
    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(code))
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic about one method.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    /// Single line message
    pub message: String,
    pub explanation: Option<String>,
    pub span: Span,
    /// Qualified name (`Type.Method`) of the method being lowered
    pub method: Option<String>,
    pub labels: Vec<Label>,
}

impl Diagnostic {
    /// Start a diagnostic with the code's default severity.
    pub fn new(code: DiagnosticCode, message: impl Into<String>) -> DiagnosticBuilder {
        DiagnosticBuilder {
            inner: Diagnostic {
                code,
                severity: code.default_severity(),
                message: message.into(),
                explanation: None,
                span: Span::DUMMY,
                method: None,
                labels: Vec::new(),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Builder returned by [`Diagnostic::new`].
pub struct DiagnosticBuilder {
    inner: Diagnostic,
}

impl DiagnosticBuilder {
    pub fn with_span(mut self, span: Span) -> Self {
        self.inner.span = span;
        self
    }

    /// Attribute the diagnostic to a method.
    pub fn in_method(mut self, method: impl Into<String>) -> Self {
        self.inner.method = Some(method.into());
        self
    }

    /// Point at a related node, e.g. the lambda forcing an allocation.
    pub fn with_label(mut self, span: Span, message: impl Into<String>) -> Self {
        self.inner.labels.push(Label::new(span, message));
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.inner.explanation = Some(help.into());
        self
    }

    pub fn build(self) -> Diagnostic {
        self.inner
    }
}

/// Diagnostics collected over a run, in report order.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    /// Add diagnostics raised while lowering `method`. Diagnostics already
    /// attributed to a method keep their attribution.
    pub fn extend_in_method(
        &mut self,
        method: &str,
        diagnostics: impl IntoIterator<Item = Diagnostic>,
    ) {
        self.items.extend(diagnostics.into_iter().map(|mut d| {
            d.method.get_or_insert_with(|| method.to_string());
            d
        }));
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    fn count_severity(&self, severity: Severity) -> usize {
        self.items.iter().filter(|d| d.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count_severity(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count_severity(Severity::Warning)
    }

    pub fn hint_count(&self) -> usize {
        self.count_severity(Severity::Hint)
    }

    pub fn count_code(&self, code: DiagnosticCode) -> usize {
        self.items.iter().filter(|d| d.code == code).count()
    }

    /// Highest severity reported, if any.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.items.iter().map(|d| d.severity).max()
    }

    /// Distinct methods with diagnostics, in first-report order.
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = Vec::new();
        for method in self.items.iter().filter_map(|d| d.method.as_deref()) {
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        methods
    }

    /// Diagnostics attributed to `method`.
    pub fn for_method<'a>(&'a self, method: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.items
            .iter()
            .filter(move |d| d.method.as_deref() == Some(method))
    }

    /// Drop diagnostics below `min`.
    pub fn retain_at_least(&mut self, min: Severity) {
        self.items.retain(|d| d.severity >= min);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_follows_category() {
        for code in DiagnosticCode::ALL {
            let expected = match &code.as_str()[..1] {
                "H" => Severity::Hint,
                "E" => Severity::Warning,
                _ => Severity::Error,
            };
            assert_eq!(code.default_severity(), expected, "{}", code);
        }
        assert!(Diagnostic::new(DiagnosticCode::UnreachableEnvironment, "lost")
            .build()
            .is_error());
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(
            DiagnosticCode::parse("I003"),
            Some(DiagnosticCode::ConflictingEnvironmentParent)
        );
        assert_eq!(DiagnosticCode::parse("e001"), Some(DiagnosticCode::RudeEdit));
        assert_eq!(DiagnosticCode::parse("X999"), None);
    }

    #[test]
    fn test_counts() {
        let mut diags = Diagnostics::new();
        diags.push(Diagnostic::new(DiagnosticCode::RudeEdit, "a").build());
        diags.push(Diagnostic::new(DiagnosticCode::InternalError, "b").build());
        diags.push(Diagnostic::new(DiagnosticCode::EnvironmentAllocated, "c").build());
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.hint_count(), 1);
        assert_eq!(diags.worst_severity(), Some(Severity::Error));

        diags.retain_at_least(Severity::Warning);
        assert_eq!(diags.len(), 2);
        assert_eq!(diags.hint_count(), 0);
    }

    #[test]
    fn test_extend_in_method_keeps_existing_attribution() {
        let mut diags = Diagnostics::new();
        diags.extend_in_method(
            "C.M",
            vec![
                Diagnostic::new(DiagnosticCode::DelegateCached, "a").build(),
                Diagnostic::new(DiagnosticCode::DelegateCached, "b")
                    .in_method("C.N")
                    .build(),
            ],
        );
        assert_eq!(diags.methods(), vec!["C.M", "C.N"]);
        assert_eq!(diags.for_method("C.M").count(), 1);
        assert_eq!(diags.for_method("C.X").count(), 0);
    }
}
