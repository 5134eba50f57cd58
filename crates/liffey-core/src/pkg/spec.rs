//! Package spec parsing (`name`, `name@range`, `@scope/name@range`).

use super::error::PkgError;
use std::fmt;

/// A parsed package specification: a name plus an optional range or tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Full package name (e.g. "@scope/name" or "name").
    pub name: String,
    /// Version range or dist-tag (None means `latest`).
    pub range: Option<String>,
}

impl PackageSpec {
    /// Create a spec from already-split parts.
    #[must_use]
    pub fn new(name: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: Some(range.into()),
        }
    }

    /// Parse a package specification string.
    ///
    /// # Errors
    /// Returns `PKG_SPEC_INVALID` for empty names, empty ranges, or scoped
    /// names missing their `/`.
    pub fn parse(input: &str) -> Result<Self, PkgError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(PkgError::spec_invalid("Empty package spec"));
        }

        // For scoped packages the version delimiter is the @ after the
        // scope separator, not the leading one.
        let search_from = if input.starts_with('@') {
            match input.find('/') {
                Some(pos) if pos > 1 && pos + 1 < input.len() => pos + 1,
                _ => {
                    return Err(PkgError::spec_invalid(format!(
                        "Invalid scoped package spec '{input}'"
                    )))
                }
            }
        } else {
            0
        };

        match input[search_from..].find('@') {
            Some(rel_pos) => {
                let at = search_from + rel_pos;
                let (name, range) = (&input[..at], &input[at + 1..]);
                if name.is_empty() || range.is_empty() {
                    return Err(PkgError::spec_invalid(format!(
                        "Invalid package spec '{input}'"
                    )));
                }
                Ok(Self {
                    name: name.to_string(),
                    range: Some(range.to_string()),
                })
            }
            None => Ok(Self {
                name: input.to_string(),
                range: None,
            }),
        }
    }

    /// Whether the package name is scoped (`@scope/name`).
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.name.starts_with('@')
    }

    /// The range to resolve, defaulting to the `latest` dist-tag.
    #[must_use]
    pub fn range_or_latest(&self) -> &str {
        self.range.as_deref().unwrap_or("latest")
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.range {
            Some(range) => write!(f, "{}@{}", self.name, range),
            None => write!(f, "{}", self.name),
        }
    }
}
