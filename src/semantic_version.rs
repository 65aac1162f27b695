use std::cmp::Ordering;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref LEADING_VERSION_NUMBERS: Regex =
        Regex::new(r"^\d+(\.\d+)?(\.\d+)?").expect("static regex is valid");
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Identifier {
    // Declared first: numeric identifiers always sort below alphanumeric ones.
    Numeric(u64),
    AlphaNumeric(String),
}

/// A semantic version as used by the `semVer*` operators.
///
/// Parsing is relaxed: only the major component is required and a missing minor or patch is
/// read as zero, so "2" and "2.0.0" are equal. Build metadata is accepted but never affects
/// comparison or equality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SemanticVersion {
    major: u64,
    minor: u64,
    patch: u64,
    prerelease: Vec<Identifier>,
}

impl SemanticVersion {
    pub fn parse(input: &str) -> Option<Self> {
        let version = semver::Version::parse(input)
            .ok()
            .or_else(|| semver::Version::parse(&pad_missing_components(input)?).ok())?;

        let prerelease = if version.pre.is_empty() {
            Vec::new()
        } else {
            version
                .pre
                .as_str()
                .split('.')
                .map(|id| match id.parse::<u64>() {
                    Ok(n) if id.bytes().all(|b| b.is_ascii_digit()) => Identifier::Numeric(n),
                    _ => Identifier::AlphaNumeric(id.to_owned()),
                })
                .collect()
        };

        Some(SemanticVersion {
            major: version.major,
            minor: version.minor,
            patch: version.patch,
            prerelease,
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }
}

// "2" -> "2.0.0", "2.1-rc" -> "2.1.0-rc"
fn pad_missing_components(input: &str) -> Option<String> {
    let numbers = LEADING_VERSION_NUMBERS.find(input)?.as_str();
    let missing = 2 - numbers.matches('.').count();
    if missing == 0 {
        return None;
    }
    Some(format!(
        "{}{}{}",
        numbers,
        ".0".repeat(missing),
        &input[numbers.len()..]
    ))
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| {
                match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => self.prerelease.cmp(&other.prerelease),
                }
            })
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        for (i, id) in self.prerelease.iter().enumerate() {
            f.write_str(if i == 0 { "-" } else { "." })?;
            match id {
                Identifier::Numeric(n) => write!(f, "{}", n)?,
                Identifier::AlphaNumeric(s) => f.write_str(s)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SemanticVersion;
    use proptest::prelude::*;
    use spectral::prelude::*;
    use std::cmp::Ordering;
    use test_case::test_case;

    fn v(s: &str) -> SemanticVersion {
        SemanticVersion::parse(s).unwrap()
    }

    #[test_case("2", "2.0.0"; "major only")]
    #[test_case("2.1", "2.1.0"; "major and minor")]
    #[test_case("2-rc.1", "2.0.0-rc.1"; "major with prerelease")]
    #[test_case("2.1+build.5", "2.1.0"; "build metadata dropped")]
    #[test_case("1.2.3-beta.2+sha.abc", "1.2.3-beta.2"; "full version")]
    fn relaxed_parsing(input: &str, canonical: &str) {
        assert_that!(v(input).to_string()).is_equal_to(canonical.to_string());
    }

    #[test_case(""; "empty")]
    #[test_case("x.1.2"; "non-numeric major")]
    #[test_case("1.2.3.4"; "too many components")]
    #[test_case("01.2.3"; "leading zero")]
    #[test_case("1.2.3-"; "empty prerelease")]
    #[test_case("v1.2.3"; "prefixed v")]
    fn rejects_invalid(input: &str) {
        assert_that!(SemanticVersion::parse(input)).is_none();
    }

    #[test_case("2.0.0", "2.0.0", Ordering::Equal; "identical")]
    #[test_case("2", "2.0.0", Ordering::Equal; "padded equal")]
    #[test_case("2.0.0+a", "2.0.0+b", Ordering::Equal; "build ignored")]
    #[test_case("3.0.0", "2.9.9", Ordering::Greater; "major wins")]
    #[test_case("2.1.0", "2.0.9", Ordering::Greater; "minor wins")]
    #[test_case("2.0.1", "2.0.0", Ordering::Greater; "patch wins")]
    #[test_case("2.0.0-rc", "2.0.0", Ordering::Less; "prerelease lower than release")]
    #[test_case("2.0.0-rc.10.green", "2.0.0-rc.2.green", Ordering::Greater; "numeric identifiers compare numerically")]
    #[test_case("2.0.0-rc.2.red", "2.0.0-rc.2.green", Ordering::Greater; "alphanumeric identifiers compare lexically")]
    #[test_case("2.0.0-rc.2.green.1", "2.0.0-rc.2.green", Ordering::Greater; "longer prerelease wins")]
    #[test_case("2.0.0-1", "2.0.0-alpha", Ordering::Less; "numeric lower than alphanumeric")]
    #[test_case("2.0.0-alpha.1", "2.0.0-alpha.beta", Ordering::Less; "numeric against alphanumeric identifier")]
    fn precedence(a: &str, b: &str, expected: Ordering) {
        assert_that!(v(a).cmp(&v(b))).is_equal_to(expected);
        assert_that!(v(b).cmp(&v(a))).is_equal_to(expected.reverse());
    }

    #[test]
    fn equality_ignores_build_metadata() {
        assert_that!(v("1.0.0+x")).is_equal_to(v("1.0.0+y"));
    }

    proptest! {
        #[test]
        fn release_order_follows_numbers(
            a in (0u64..50, 0u64..50, 0u64..50),
            b in (0u64..50, 0u64..50, 0u64..50),
        ) {
            let va = v(&format!("{}.{}.{}", a.0, a.1, a.2));
            let vb = v(&format!("{}.{}.{}", b.0, b.1, b.2));
            prop_assert_eq!(va.cmp(&vb), a.cmp(&b));
        }

        #[test]
        fn prerelease_is_below_its_release(
            major in 0u64..100,
            tag in "[a-z][a-z0-9]{0,6}",
        ) {
            let release = v(&format!("{}.0.0", major));
            let pre = v(&format!("{}.0.0-{}", major, tag));
            prop_assert!(pre < release);
        }
    }
}
