use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

/// Why an attribute reference string could not be parsed.
#[derive(Clone, Copy, Debug, Error, Hash, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("attribute reference cannot be empty")]
    Empty,
    #[error("attribute reference contains an invalid escape sequence")]
    InvalidEscapeSequence,
    #[error("attribute reference contains a double or trailing slash")]
    DoubleOrTrailingSlash,
}

/// Identifies an attribute, or a value nested inside one, within a [crate::Context].
///
/// A string beginning with `/` is a path: each slash-separated component names a property one
/// level deeper, and `~1` / `~0` stand for a literal `/` / `~` inside a component. Any other
/// string names a top-level attribute literally.
///
/// Parsing happens once, up front. An invalid input is still held (so it displays and
/// serializes as it was written) but [Reference::is_valid] reports false and every lookup
/// through it fails.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Reference {
    input: String,
    parsed: Parsed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
enum Parsed {
    Plain,
    Path(Vec<String>),
    Invalid(ReferenceError),
}

impl Reference {
    pub fn new<S: AsRef<str>>(value: S) -> Self {
        let input = value.as_ref().to_owned();
        let parsed = match Self::parse(&input) {
            Ok(None) => Parsed::Plain,
            Ok(Some(components)) => Parsed::Path(components),
            Err(e) => Parsed::Invalid(e),
        };
        Self { input, parsed }
    }

    /// Parses `value`, failing where [Reference::new] would produce an invalid reference.
    pub fn try_new<S: AsRef<str>>(value: S) -> Result<Self, ReferenceError> {
        let reference = Self::new(value);
        match reference.parsed {
            Parsed::Invalid(e) => Err(e),
            _ => Ok(reference),
        }
    }

    /// Builds a reference to the top-level attribute called `name`, even if `name` starts with
    /// a slash. Clauses written before attribute paths existed name attributes this way.
    pub fn from_literal<S: AsRef<str>>(name: S) -> Self {
        let name = name.as_ref();
        if !name.starts_with('/') {
            return Self::new(name);
        }
        Self::new(format!("/{}", name.replace('~', "~0").replace('/', "~1")))
    }

    fn parse(input: &str) -> Result<Option<Vec<String>>, ReferenceError> {
        if input.is_empty() || input == "/" {
            return Err(ReferenceError::Empty);
        }
        let Some(path) = input.strip_prefix('/') else {
            return Ok(None);
        };
        path.split('/')
            .map(|component| {
                if component.is_empty() {
                    Err(ReferenceError::DoubleOrTrailingSlash)
                } else {
                    unescape(component)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.parsed, Parsed::Invalid(_))
    }

    pub fn error(&self) -> Option<ReferenceError> {
        match self.parsed {
            Parsed::Invalid(e) => Some(e),
            _ => None,
        }
    }

    /// Number of path components; 1 for a plain name and 0 for an invalid reference.
    pub fn depth(&self) -> usize {
        match &self.parsed {
            Parsed::Plain => 1,
            Parsed::Path(components) => components.len(),
            Parsed::Invalid(_) => 0,
        }
    }

    pub fn component(&self, index: usize) -> Option<&str> {
        match &self.parsed {
            Parsed::Plain if index == 0 => Some(&self.input),
            Parsed::Path(components) => components.get(index).map(String::as_str),
            _ => None,
        }
    }

    /// True if this reference addresses the context kind rather than an attribute.
    pub(crate) fn is_kind(&self) -> bool {
        self.depth() == 1 && self.component(0) == Some("kind")
    }

    pub fn as_str(&self) -> &str {
        &self.input
    }
}

fn unescape(component: &str) -> Result<String, ReferenceError> {
    if !component.contains('~') {
        return Ok(component.to_owned());
    }
    let mut out = String::with_capacity(component.len());
    let mut chars = component.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(ReferenceError::InvalidEscapeSequence),
        }
    }
    Ok(out)
}

impl Default for Reference {
    /// The empty reference, which is invalid.
    fn default() -> Self {
        Reference::new("")
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.input)
    }
}

impl From<&str> for Reference {
    fn from(s: &str) -> Self {
        Reference::new(s)
    }
}

impl From<String> for Reference {
    fn from(s: String) -> Self {
        Reference::new(s)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.input)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Reference::new)
    }
}

#[cfg(test)]
mod tests {
    use super::{Reference, ReferenceError};
    use proptest::prelude::*;
    use test_case::test_case;

    proptest! {
        #[test]
        fn plain_names_are_single_component(s in "[^/].*") {
            let reference = Reference::new(&s);
            prop_assert!(reference.is_valid());
            prop_assert_eq!(reference.depth(), 1);
            prop_assert_eq!(reference.component(0), Some(s.as_str()));
        }

        #[test]
        fn literal_names_always_resolve_to_themselves(s in ".+") {
            let reference = Reference::from_literal(&s);
            prop_assert!(reference.is_valid());
            prop_assert_eq!(reference.depth(), 1);
            prop_assert_eq!(reference.component(0), Some(s.as_str()));
        }

        #[test]
        fn display_preserves_input(s in any::<String>()) {
            prop_assert_eq!(Reference::new(&s).to_string(), s);
        }
    }

    #[test_case("", ReferenceError::Empty; "empty reference")]
    #[test_case("/", ReferenceError::Empty; "lone slash")]
    #[test_case("//", ReferenceError::DoubleOrTrailingSlash; "double slash only")]
    #[test_case("/a//b", ReferenceError::DoubleOrTrailingSlash; "double slash inside")]
    #[test_case("/a/b/", ReferenceError::DoubleOrTrailingSlash; "trailing slash")]
    #[test_case("/~3", ReferenceError::InvalidEscapeSequence; "unknown escape")]
    #[test_case("/m~~0", ReferenceError::InvalidEscapeSequence; "tilde before escape")]
    #[test_case("/a~", ReferenceError::InvalidEscapeSequence; "dangling tilde")]
    fn invalid_references(input: &str, error: ReferenceError) {
        let reference = Reference::new(input);
        assert!(!reference.is_valid());
        assert_eq!(reference.error(), Some(error));
        assert_eq!(reference.depth(), 0);
        assert_eq!(Reference::try_new(input), Err(error));
    }

    #[test_case("/a/b", 1, "b"; "second component")]
    #[test_case("/a~1b/c", 0, "a/b"; "escaped slash")]
    #[test_case("/a~0b/c", 0, "a~b"; "escaped tilde")]
    #[test_case("/a/10/20/30x", 3, "30x"; "numeric-looking components")]
    fn path_components(input: &str, index: usize, expected: &str) {
        let reference = Reference::new(input);
        assert!(reference.is_valid());
        assert_eq!(reference.component(index), Some(expected));
    }

    #[test]
    fn out_of_range_components() {
        let reference = Reference::new("/a/b");
        assert_eq!(reference.depth(), 2);
        assert!(reference.component(2).is_none());
        assert!(Reference::new("name").component(1).is_none());
    }

    #[test_case("/a/b", "/~1a~1b"; "path")]
    #[test_case("a~1b", "a~1b"; "literal containing escape")]
    #[test_case("/a~0b", "/~1a~00b"; "path with tilde")]
    fn literal_names_are_escaped(name: &str, expected: &str) {
        assert_eq!(Reference::from_literal(name), Reference::new(expected));
    }

    #[test]
    fn kind_references() {
        assert!(Reference::new("kind").is_kind());
        assert!(Reference::new("/kind").is_kind());
        assert!(!Reference::from_literal("/kind").is_kind());
        assert!(!Reference::new("/kind/x").is_kind());
    }
}
