//! Product version ordering
//!
//! Versions are dot-separated base-10 components (`1.2.3.4`). Components
//! compare by numeric value, leading zeros are ignored and a shorter
//! version behaves as if padded with trailing zero components, so `1.2`
//! and `1.2.0` are equal. Components are kept as digit strings, which
//! keeps arbitrarily long components comparable without overflow.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Returned when a string does not follow the version grammar
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version string: {0:?}")]
pub struct InvalidVersion(pub String);

/// A parsed product version
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProductVersion {
    raw: String,
    components: Vec<String>,
}

impl ProductVersion {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self, InvalidVersion> {
        if s.is_empty() {
            return Err(InvalidVersion(s.to_string()));
        }

        let components = s
            .split('.')
            .map(|part| {
                if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(InvalidVersion(s.to_string()));
                }
                let trimmed = part.trim_start_matches('0');
                Ok(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: s.to_string(),
            components,
        })
    }

    /// The version exactly as it was written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Number of dot-separated components as written
    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

fn compare_component(a: &str, b: &str) -> Ordering {
    // Both sides are normalized digit strings without leading zeros
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Ord for ProductVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).map_or("0", String::as_str);
            let b = other.components.get(i).map_or("0", String::as_str);
            match compare_component(a, b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for ProductVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ProductVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ProductVersion {}

impl FromStr for ProductVersion {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProductVersion {
    type Error = InvalidVersion;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ProductVersion> for String {
    fn from(value: ProductVersion) -> Self {
        value.raw
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Whether `s` follows the version grammar
pub fn is_valid(s: &str) -> bool {
    ProductVersion::parse(s).is_ok()
}

/// Compare two version strings.
///
/// Returns `None` when either side is not a valid version.
pub fn compare(a: &str, b: &str) -> Option<Ordering> {
    let a = ProductVersion::parse(a).ok()?;
    let b = ProductVersion::parse(b).ok()?;
    Some(a.cmp(&b))
}

/// Whether `candidate` is strictly newer than `installed`.
///
/// A missing or unparsable installed version counts as older than anything.
pub fn is_newer(candidate: &ProductVersion, installed: Option<&str>) -> bool {
    match installed.map(ProductVersion::parse) {
        Some(Ok(installed)) => *candidate > installed,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_trailing_zero_components_are_equal() {
        assert_eq!(compare("1.2", "1.2.0"), Some(Ordering::Equal));
        assert_eq!(compare("1.2.0.0", "1.2"), Some(Ordering::Equal));
    }

    #[test]
    fn test_numeric_component_ordering() {
        assert_eq!(compare("1.9", "1.10"), Some(Ordering::Less));
        assert_eq!(compare("2.0", "1.99.99"), Some(Ordering::Greater));
        assert_eq!(compare("1.2.3.4", "1.2.3.5"), Some(Ordering::Less));
    }

    #[test]
    fn test_leading_zeros_ignored() {
        assert_eq!(compare("01.002", "1.2"), Some(Ordering::Equal));
        assert_eq!(compare("1.0010", "1.9"), Some(Ordering::Greater));
    }

    #[test]
    fn test_grammar() {
        assert!(is_valid("1"));
        assert!(is_valid("1.2.3.4"));
        assert!(is_valid("0.0"));
        assert!(!is_valid("1.2.a"));
        assert!(!is_valid("x.y"));
        assert!(!is_valid(""));
        assert!(!is_valid("1..2"));
        assert!(!is_valid("1.2."));
        assert!(!is_valid("-1.2"));
        assert!(!is_valid("+1.2"));
        assert!(!is_valid(" 1.2"));
    }

    #[test]
    fn test_invalid_input_has_no_ordering() {
        assert_eq!(compare("1.2.a", "1.2"), None);
        assert_eq!(compare("1.2", ""), None);
    }

    #[test]
    fn test_huge_components_compare() {
        assert_eq!(
            compare("1.99999999999999999999999", "1.100000000000000000000000"),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_display_keeps_original_text() {
        let version = ProductVersion::parse("1.02.0").unwrap();
        assert_eq!(version.to_string(), "1.02.0");
        assert_eq!(version.component_count(), 3);
    }

    #[test]
    fn test_is_newer() {
        let candidate = ProductVersion::parse("2.0").unwrap();
        assert!(is_newer(&candidate, Some("1.9.9")));
        assert!(!is_newer(&candidate, Some("2.0.0")));
        assert!(!is_newer(&candidate, Some("2.1")));
        assert!(is_newer(&candidate, None));
    }

    fn version_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(0u32..20, 1..5).prop_map(|parts| {
            parts
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(".")
        })
    }

    proptest! {
        #[test]
        fn prop_compare_is_antisymmetric(a in version_strategy(), b in version_strategy()) {
            let forward = compare(&a, &b).unwrap();
            let backward = compare(&b, &a).unwrap();
            prop_assert_eq!(forward, backward.reverse());
        }

        #[test]
        fn prop_compare_is_reflexive(a in version_strategy()) {
            prop_assert_eq!(compare(&a, &a), Some(Ordering::Equal));
        }

        #[test]
        fn prop_zero_padding_is_equal(a in version_strategy()) {
            let padded = format!("{}.0", a);
            prop_assert_eq!(compare(&a, &padded), Some(Ordering::Equal));
        }
    }
}
