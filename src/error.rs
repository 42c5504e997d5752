//! Error and issue types for compilation, loading, and validation.
//!
//! Compile-time problems are split from runtime findings on purpose:
//! a [`CompileError`] degrades the affected validator to `Any` and lands in
//! the compiler log, a [`LoaderError`] is the only error kind that crosses
//! the facade boundary as `Err`, and validation findings are plain data
//! ([`Issue`]) accumulated into the returned result.

use std::fmt;

use thiserror::Error;

/// Errors raised while lowering definitions into executable schemas.
///
/// None of these abort a compilation run. They are recorded in the
/// [`CompileLog`] and the offending validator is replaced by `Any`.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// The definition is structurally unusable (e.g. no snapshot root).
    #[error("malformed definition {url}: {message}")]
    MalformedDefinition { url: String, message: String },

    /// A snapshot element names a parent that does not exist anywhere in
    /// the element tree, including slicing branches.
    #[error("orphan element {element_id} in {url}")]
    OrphanElement { url: String, element_id: String },

    /// The resource declares a kind or content mode the compiler does not
    /// lower.
    #[error("unsupported kind '{kind}' in {url}")]
    UnsupportedKind { url: String, kind: String },

    /// A referenced canonical URL was never registered. Compilation
    /// proceeds with `Any` in its place.
    #[error("unresolved dependency {dependency} of {url}")]
    UnresolvedDependency { url: String, dependency: String },

    /// A dependency cycle was detected. Reported once per cycle; the URLs
    /// involved compile best-effort.
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Errors raised while acquiring or reading package content.
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("package not found: {name}@{version}")]
    PackageNotFound { name: String, version: String },

    #[error("download failed for {name}@{version}: {message}")]
    DownloadFailed {
        name: String,
        version: String,
        message: String,
    },

    #[error("cache corrupt at {path}: {message}")]
    CacheCorrupt { path: String, message: String },

    #[error("json parse error in {path}: {source}")]
    JsonParseError {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result alias for loader-facing operations.
pub type LoaderResult<T> = std::result::Result<T, LoaderError>;

/// Machine-readable classification of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueCode {
    TypeMismatch,
    CardinalityViolation,
    MissingRequiredField,
    ExtraUnknownField,
    PatternViolation,
    RegexViolation,
    LengthViolation,
    BoundaryViolation,
    EnumViolation,
    ChoiceOfTypeAmbiguity,
    SliceUnmatched,
    FhirPathConstraint,
    UnknownProfile,
    Cancelled,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::TypeMismatch => "type-mismatch",
            IssueCode::CardinalityViolation => "cardinality-violation",
            IssueCode::MissingRequiredField => "missing-required-field",
            IssueCode::ExtraUnknownField => "extra-unknown-field",
            IssueCode::PatternViolation => "pattern-violation",
            IssueCode::RegexViolation => "regex-violation",
            IssueCode::LengthViolation => "length-violation",
            IssueCode::BoundaryViolation => "boundary-violation",
            IssueCode::EnumViolation => "enum-violation",
            IssueCode::ChoiceOfTypeAmbiguity => "choice-of-type-ambiguity",
            IssueCode::SliceUnmatched => "slice-unmatched",
            IssueCode::FhirPathConstraint => "fhirpath-constraint",
            IssueCode::UnknownProfile => "unknown-profile",
            IssueCode::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validation finding. Never an `Err`: findings accumulate into the
/// returned result and validation always runs to completion (or
/// cancellation).
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub code: IssueCode,
    /// Dotted location in the document, e.g. `Patient.name.0.family`.
    pub path: String,
    pub message: String,
}

impl Issue {
    pub fn new(code: IssueCode, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Accumulating log of compile-time problems.
///
/// The compiler never aborts on these; callers inspect the log after
/// `compile_all` to surface warnings.
#[derive(Debug, Default)]
pub struct CompileLog {
    entries: Vec<CompileError>,
}

impl CompileLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompileError) {
        tracing::warn!(error = %error, "compile warning");
        self.entries.push(error);
    }

    pub fn entries(&self) -> &[CompileError] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cycles(&self) -> impl Iterator<Item = &[String]> {
        self.entries.iter().filter_map(|e| match e {
            CompileError::CyclicDependency { cycle } => Some(cycle.as_slice()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_display_includes_path() {
        let issue = Issue::new(IssueCode::TypeMismatch, "Patient.active", "expected boolean");
        assert_eq!(issue.to_string(), "Patient.active: expected boolean");

        let rootless = Issue::new(IssueCode::UnknownProfile, "", "Could not find schema");
        assert_eq!(rootless.to_string(), "Could not find schema");
    }

    #[test]
    fn compile_log_collects_cycles() {
        let mut log = CompileLog::new();
        log.push(CompileError::CyclicDependency {
            cycle: vec!["a".into(), "b".into()],
        });
        log.push(CompileError::UnresolvedDependency {
            url: "a".into(),
            dependency: "c".into(),
        });
        assert_eq!(log.cycles().count(), 1);
        assert_eq!(log.entries().len(), 2);
    }
}
