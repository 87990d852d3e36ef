//! Release version comparison

use std::cmp::Ordering;

/// Parsed `major.minor.patch[-prerelease]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: Option<String>,
}

impl Version {
    /// Parse a version string, tolerating a leading `v` and missing components
    #[must_use]
    pub fn parse(version: &str) -> Self {
        let version = version.trim();
        let version = version.strip_prefix('v').unwrap_or(version);
        // build metadata never takes part in ordering and may contain '-'
        let version = version.split_once('+').map_or(version, |(v, _)| v);
        let (core, prerelease) = match version.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some((core, _)) => (core, None),
            None => (version, None),
        };

        let mut nums = core.split('.').map(|s| s.parse::<u32>().unwrap_or(0));
        Self {
            major: nums.next().unwrap_or(0),
            minor: nums.next().unwrap_or(0),
            patch: nums.next().unwrap_or(0),
            prerelease,
        }
    }

    /// Whether this is a prerelease build
    #[must_use]
    pub const fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                // A release sorts after any of its prereleases
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

/// Dot-separated identifier ordering: numeric identifiers compare as
/// numbers and sort below alphanumeric ones; a shorter list sorts first
/// when all shared identifiers are equal
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        let ordering = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match (x.parse::<u64>(), y.parse::<u64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                (Ok(_), Err(_)) => Ordering::Less,
                (Err(_), Ok(_)) => Ordering::Greater,
                (Err(_), Err(_)) => x.cmp(y),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version strings
#[must_use]
pub fn compare_versions(current: &str, latest: &str) -> Ordering {
    Version::parse(current).cmp(&Version::parse(latest))
}

/// Whether `candidate` should replace `current`
///
/// Downgrades and re-installs are never accepted; prereleases only when
/// `allow_prerelease` is set.
#[must_use]
pub fn is_newer(current: &str, candidate: &str, allow_prerelease: bool) -> bool {
    let candidate = Version::parse(candidate);
    if candidate.is_prerelease() && !allow_prerelease {
        return false;
    }
    Version::parse(current) < candidate
}
