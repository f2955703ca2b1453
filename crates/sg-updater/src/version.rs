//! Dotted version identifiers.
//!
//! Release tags look like `v1.10.0`, `1.2`, or `2.0.0-beta.1`. Components are
//! compared numerically, one by one, with missing trailing components read as
//! zero. Comparing `"1.10.0"` and `"1.9.5"` as strings gives the wrong answer;
//! comparing them as [`Version`]s does not.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::ReleaseError;

/// Pre-release identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreRelease {
    /// Any tag not recognised below (e.g. `dev`, `nightly.3`).
    Other(String),
    /// Alpha release (e.g., "alpha.1").
    Alpha(u32),
    /// Beta release (e.g., "beta.2").
    Beta(u32),
    /// Release candidate (e.g., "rc.1").
    ReleaseCandidate(u32),
}

impl PreRelease {
    fn parse(s: &str) -> Self {
        let lower = s.to_lowercase();
        let numbered = |prefix: &str| -> Option<u32> {
            let rest = lower.strip_prefix(prefix)?;
            if rest.is_empty() {
                return Some(0);
            }
            rest.trim_start_matches('.').parse().ok()
        };

        if let Some(n) = numbered("alpha") {
            Self::Alpha(n)
        } else if let Some(n) = numbered("beta") {
            Self::Beta(n)
        } else if let Some(n) = numbered("rc") {
            Self::ReleaseCandidate(n)
        } else {
            Self::Other(lower)
        }
    }

    /// Ordering priority (other < alpha < beta < rc).
    fn priority(&self) -> u8 {
        match self {
            Self::Other(_) => 0,
            Self::Alpha(_) => 1,
            Self::Beta(_) => 2,
            Self::ReleaseCandidate(_) => 3,
        }
    }
}

impl PartialOrd for PreRelease {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PreRelease {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority()
            .cmp(&other.priority())
            .then_with(|| match (self, other) {
                (Self::Alpha(a), Self::Alpha(b))
                | (Self::Beta(a), Self::Beta(b))
                | (Self::ReleaseCandidate(a), Self::ReleaseCandidate(b)) => a.cmp(b),
                (Self::Other(a), Self::Other(b)) => a.cmp(b),
                _ => Ordering::Equal,
            })
    }
}

impl fmt::Display for PreRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(tag) => f.write_str(tag),
            Self::Alpha(n) => write!(f, "alpha.{n}"),
            Self::Beta(n) => write!(f, "beta.{n}"),
            Self::ReleaseCandidate(n) => write!(f, "rc.{n}"),
        }
    }
}

/// A dotted numeric version with an optional pre-release tag.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
    pre_release: Option<PreRelease>,
}

impl Version {
    /// Create a stable version from its components.
    #[must_use]
    pub fn new(components: impl Into<Vec<u64>>) -> Self {
        Self {
            components: components.into(),
            pre_release: None,
        }
    }

    /// Attach a pre-release tag.
    #[must_use]
    pub fn with_pre_release(mut self, pre_release: PreRelease) -> Self {
        self.pre_release = Some(pre_release);
        self
    }

    /// Numeric components as written.
    #[must_use]
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// The pre-release tag, if any.
    #[must_use]
    pub fn pre_release(&self) -> Option<&PreRelease> {
        self.pre_release.as_ref()
    }

    /// Check if this version is a stable release.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.pre_release.is_none()
    }

    /// Parse a release tag, tolerating a leading `v` and `+build` metadata.
    pub fn from_tag(tag: &str) -> Result<Self, ReleaseError> {
        Self::from_str(tag)
    }
}

impl FromStr for Version {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, ReleaseError> {
        let invalid = || ReleaseError::InvalidVersion(s.to_string());
        let trimmed = s.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let trimmed = trimmed.split_once('+').map_or(trimmed, |(v, _)| v);

        let (numbers, pre_release) = match trimmed.split_once('-') {
            Some((numbers, tag)) if !tag.is_empty() => (numbers, Some(PreRelease::parse(tag))),
            Some(_) => return Err(invalid()),
            None => (trimmed, None),
        };

        let components = numbers
            .split('.')
            .map(|part| part.parse::<u64>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            components,
            pre_release,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in &self.components {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        if let Some(pre) = &self.pre_release {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }

        // 1.0.0-beta.1 < 1.0.0
        match (&self.pre_release, &other.pre_release) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

/// Whether `candidate` is strictly newer than `current`.
///
/// Unparseable input is never newer.
#[must_use]
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (Version::from_str(candidate), Version::from_str(current)) {
        (Ok(candidate), Ok(current)) => candidate > current,
        (candidate, current) => {
            tracing::warn!(
                candidate_ok = candidate.is_ok(),
                current_ok = current.is_ok(),
                "cannot compare versions"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_is_newer_numeric_not_lexical() {
        assert!(is_newer("1.10.0", "1.9.5"));
        assert!(!is_newer("1.2.0", "1.2.0"));
        assert!(is_newer("2.0.0", "1.99.99"));
        assert!(!is_newer("1.9.5", "1.10.0"));
    }

    #[test]
    fn test_tag_prefix_and_build_metadata() {
        let v = Version::from_tag("v1.2.3+abc").unwrap();
        assert_eq!(v.components(), &[1, 2, 3]);
        assert!(v.is_stable());
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(Version::from_str("1.2").unwrap(), Version::new([1, 2, 0]));
        assert!(is_newer("1.2.0.1", "1.2"));
    }

    #[test]
    fn test_pre_release_ordering() {
        let alpha = Version::from_str("1.0.0-alpha").unwrap();
        let beta = Version::from_str("1.0.0-beta.2").unwrap();
        let rc = Version::from_str("1.0.0-rc.1").unwrap();
        let stable = Version::from_str("1.0.0").unwrap();
        assert!(alpha < beta);
        assert!(beta < rc);
        assert!(rc < stable);
        assert!(Version::from_str("1.0.1-beta.1").unwrap() > stable);
    }

    #[test]
    fn test_invalid_versions() {
        assert!(Version::from_str("").is_err());
        assert!(Version::from_str("1..2").is_err());
        assert!(Version::from_str("one.two").is_err());
        assert!(Version::from_str("1.0.0-").is_err());
        assert!(!is_newer("garbage", "1.0.0"));
        assert!(!is_newer("1.0.0", "garbage"));
    }

    #[test]
    fn test_display_round_trips_tag() {
        assert_eq!(Version::from_tag("v0.3.12").unwrap().to_string(), "0.3.12");
        assert_eq!(
            Version::from_str("2.0.0-rc.1").unwrap().to_string(),
            "2.0.0-rc.1"
        );
    }

    proptest! {
        #[test]
        fn prop_is_newer_is_strict(a in prop::collection::vec(0u64..1000, 1..5),
                                   b in prop::collection::vec(0u64..1000, 1..5)) {
            let a = Version::new(a).to_string();
            let b = Version::new(b).to_string();
            prop_assert!(!(is_newer(&a, &b) && is_newer(&b, &a)));
            prop_assert!(!is_newer(&a, &a));
        }

        #[test]
        fn prop_bumping_any_component_is_newer(base in prop::collection::vec(0u64..1000, 1..5),
                                               index in 0usize..5) {
            let mut bumped = base.clone();
            let index = index % bumped.len();
            bumped[index] += 1;
            let base = Version::new(base).to_string();
            let bumped = Version::new(bumped).to_string();
            prop_assert!(is_newer(&bumped, &base));
        }
    }
}
