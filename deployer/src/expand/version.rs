//! Version parsing and grouping of deploy keys
//!
//! A key such as `shop-1.2.3` splits into the base key `shop` and the version
//! suffix `1.2.3`. Keys sharing a base key form a [`VersionGroup`] whose
//! primary member (the highest version) receives default routing.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// One deploy key resolved into base key and version suffix
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpandVersion {
    key: String,
    base_key: String,
    version: String,
}

impl ExpandVersion {
    /// Parse a key. With `versioning` disabled the key is its own base.
    pub fn parse(key: &str, versioning: bool) -> Self {
        if versioning {
            if let Some((base, suffix)) = key.rsplit_once('-') {
                if !base.is_empty() && is_version_suffix(suffix) {
                    return Self {
                        key: key.to_string(),
                        base_key: base.to_string(),
                        version: suffix.to_string(),
                    };
                }
            }
        }

        Self::unversioned(key)
    }

    /// A key that carries no version
    pub fn unversioned(key: &str) -> Self {
        Self {
            key: key.to_string(),
            base_key: key.to_string(),
            version: String::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    /// The dotted version suffix, empty when unversioned
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn is_versioned(&self) -> bool {
        !self.version.is_empty()
    }

    /// Routing order: higher version first wins, unversioned lowest,
    /// equal versions fall back to the key for determinism
    fn precedence_cmp(&self, other: &Self) -> Ordering {
        compare_versions(&self.version, &other.version).then_with(|| self.key.cmp(&other.key))
    }
}

/// A suffix is a version iff it is only digits and dots with at least one digit
pub fn is_version_suffix(suffix: &str) -> bool {
    suffix.chars().all(|c| c.is_ascii_digit() || c == '.')
        && suffix.chars().any(|c| c.is_ascii_digit())
}

/// Compare two dotted versions field by field as integers.
///
/// The empty version sorts below every real version. Missing fields count as
/// zero, so `1.0` equals `1.0.0`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    let a_fields: Vec<&str> = a.split('.').collect();
    let b_fields: Vec<&str> = b.split('.').collect();

    for i in 0..a_fields.len().max(b_fields.len()) {
        let x = a_fields.get(i).copied().unwrap_or("");
        let y = b_fields.get(i).copied().unwrap_or("");
        match compare_numeric_field(x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }

    Ordering::Equal
}

// arbitrary precision: strip leading zeros, then length, then digits
fn compare_numeric_field(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// All versions sharing one base key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionGroup {
    base_key: String,
    members: BTreeMap<String, ExpandVersion>,
    primary: ExpandVersion,
}

impl VersionGroup {
    /// A group is never empty: it starts from its first member
    pub fn new(first: ExpandVersion) -> Self {
        let mut members = BTreeMap::new();
        members.insert(first.key.clone(), first.clone());
        Self {
            base_key: first.base_key.clone(),
            members,
            primary: first,
        }
    }

    /// Add a member and recompute the primary
    pub fn add(&mut self, version: ExpandVersion) {
        debug_assert_eq!(version.base_key, self.base_key);
        if version.precedence_cmp(&self.primary) == Ordering::Greater {
            self.primary = version.clone();
        }
        self.members.insert(version.key.clone(), version);
    }

    pub fn base_key(&self) -> &str {
        &self.base_key
    }

    pub fn primary(&self) -> &ExpandVersion {
        &self.primary
    }

    pub fn members(&self) -> impl Iterator<Item = &ExpandVersion> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.members.contains_key(key)
    }
}

/// Result of resolving a key set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionResolution {
    pub versions: BTreeMap<String, ExpandVersion>,
    pub groups: BTreeMap<String, VersionGroup>,
}

impl VersionResolution {
    pub fn base_keys(&self) -> BTreeSet<String> {
        self.groups.keys().cloned().collect()
    }
}

/// Resolve raw keys into versions and version groups
pub fn resolve<'a>(keys: impl IntoIterator<Item = &'a str>, versioning: bool) -> VersionResolution {
    let mut resolution = VersionResolution::default();

    for key in keys {
        let version = ExpandVersion::parse(key, versioning);

        match resolution.groups.get_mut(version.base_key()) {
            Some(group) => group.add(version.clone()),
            None => {
                resolution
                    .groups
                    .insert(version.base_key.clone(), VersionGroup::new(version.clone()));
            }
        }

        resolution.versions.insert(version.key.clone(), version);
    }

    resolution
}
