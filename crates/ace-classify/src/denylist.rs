//! Dangerous-action deny-list
//!
//! Case-insensitive substring matching over proposed action text. Matching is
//! intentionally conservative: one hit flags the action and routes it through
//! the approval gate.

/// Default dangerous-action substrings
pub const DEFAULT_DENY_PATTERNS: &[&str] = &[
    "delete",
    "remove",
    "rm ",
    "rm -",
    "drop",
    "truncate",
    "format",
    "sudo",
    "chmod 777",
    "/dev/null",
];

/// A configurable set of case-insensitive dangerous substrings
#[derive(Debug, Clone)]
pub struct DenyList {
    /// Patterns stored lowercase
    patterns: Vec<String>,
}

impl DenyList {
    /// The default deny-list
    #[must_use]
    pub fn standard() -> Self {
        Self {
            patterns: DEFAULT_DENY_PATTERNS
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// The default deny-list extended with host-supplied substrings
    #[must_use]
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::standard();
        for pattern in extra {
            let lowered = pattern.as_ref().to_lowercase();
            if !lowered.is_empty() && !list.patterns.contains(&lowered) {
                list.patterns.push(lowered);
            }
        }
        list
    }

    /// Returns the first matching pattern, if any.
    #[must_use]
    pub fn matches(&self, action: &str) -> Option<&str> {
        let lowered = action.to_lowercase();
        self.patterns
            .iter()
            .find(|p| lowered.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Whether the action text hits the deny-list
    #[must_use]
    pub fn is_dangerous(&self, action: &str) -> bool {
        self.matches(action).is_some()
    }

    /// Number of configured patterns
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the list is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for DenyList {
    fn default() -> Self {
        Self::standard()
    }
}
