//! Classification of worker failures.
//!
//! A worker that reports an error may still have committed its work. Some
//! errors (a tool the worker asked for was unavailable) are known to be
//! benign in that sense; those are classified as recoverable and the story
//! still goes through completion detection. Everything else is fatal for the
//! story this cycle.
//!
//! The recoverable class is matched on the worker's free-form message. This
//! couples orchestration to worker wording; a structured error code in the
//! worker contract would replace it.

use regex::{RegexSet, RegexSetBuilder};

/// Default patterns for the "tool unavailable" class of worker errors.
pub const DEFAULT_RECOVERABLE_PATTERNS: &[&str] = &[
    r"no such tool available",
    r"tool\b.*\b(?:is )?(?:not available|unavailable)",
    r"tool_use.*not (?:found|supported)",
];

/// Category assigned to a failed worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Known-benign error; the run may still have produced a completion commit.
    Recoverable(String),
    /// Any other reported error or crash.
    Fatal(String),
    /// The worker did not return before its deadline.
    Timeout(String),
}

impl ErrorCategory {
    /// Stable label used in progress output and evidence records.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCategory::Recoverable(_) => "recoverable",
            ErrorCategory::Fatal(_) => "fatal",
            ErrorCategory::Timeout(_) => "timeout",
        }
    }

    /// The underlying message.
    pub fn message(&self) -> &str {
        match self {
            ErrorCategory::Recoverable(msg)
            | ErrorCategory::Fatal(msg)
            | ErrorCategory::Timeout(msg) => msg,
        }
    }

    /// Whether the story should still proceed to merge detection.
    pub fn proceeds_to_merge(&self) -> bool {
        matches!(self, ErrorCategory::Recoverable(_))
    }
}

/// Case-insensitive matcher for recoverable worker error messages.
#[derive(Debug, Clone)]
pub struct RecoverableMatcher {
    set: RegexSet,
}

impl RecoverableMatcher {
    /// Build a matcher from regex patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()?;
        Ok(Self { set })
    }

    /// Whether `message` belongs to the recoverable class.
    pub fn is_recoverable(&self, message: &str) -> bool {
        self.set.is_match(message)
    }

    /// Classify a worker-reported error message.
    pub fn classify(&self, message: &str) -> ErrorCategory {
        if self.is_recoverable(message) {
            ErrorCategory::Recoverable(message.to_string())
        } else {
            ErrorCategory::Fatal(message.to_string())
        }
    }
}

impl Default for RecoverableMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_RECOVERABLE_PATTERNS).expect("default recoverable patterns are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_unavailable_is_recoverable() {
        let matcher = RecoverableMatcher::default();
        assert!(matcher.is_recoverable("Error: No such tool available: mcp__browser"));
        assert!(matcher.is_recoverable("the requested tool is unavailable"));
        assert!(matcher.is_recoverable("Tool WebFetch not available in this session"));
    }

    #[test]
    fn test_other_errors_are_fatal() {
        let matcher = RecoverableMatcher::default();
        let category = matcher.classify("rate limit exceeded");
        assert_eq!(category, ErrorCategory::Fatal("rate limit exceeded".to_string()));
        assert!(!category.proceeds_to_merge());
    }

    #[test]
    fn test_classify_recoverable_proceeds_to_merge() {
        let matcher = RecoverableMatcher::default();
        let category = matcher.classify("No such tool available: Task");
        assert_eq!(category.label(), "recoverable");
        assert!(category.proceeds_to_merge());
    }

    #[test]
    fn test_custom_patterns() {
        let matcher = RecoverableMatcher::new(["sandbox denied"]).expect("matcher");
        assert!(matcher.is_recoverable("SANDBOX DENIED write to /etc"));
        assert!(!matcher.is_recoverable("No such tool available"));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(RecoverableMatcher::new(["("]).is_err());
    }

    #[test]
    fn test_timeout_label() {
        let category = ErrorCategory::Timeout("worker timed out after 30s".to_string());
        assert_eq!(category.label(), "timeout");
        assert_eq!(category.message(), "worker timed out after 30s");
    }
}
