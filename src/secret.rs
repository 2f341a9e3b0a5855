//! Value types for credentials, destinations and secret values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Identifies one rotatable credential, e.g. an IAM user name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialInfo(String);

impl CredentialInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies one storage target, e.g. `owner/repo` for a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationRef(String);

impl DestinationRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Field name to secret value.
///
/// A map is built once (by a rotation, or from a plugin's key declaration) and
/// then only copied into new maps; there is no in-place mutation. `Debug`
/// output never shows the values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretMap(HashMap<String, String>);

impl SecretMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a key declaration: the values are placeholders and are ignored.
    pub fn declare<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        keys.into_iter().map(|k| (k.into(), String::new())).collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Sorted field names, for comparisons and log output.
    pub fn key_names(&self) -> BTreeSet<&str> {
        self.keys().collect()
    }

    /// True when both maps hold exactly the same field names.
    pub fn same_keys(&self, other: &SecretMap) -> bool {
        self.len() == other.len() && self.keys().all(|k| other.contains_key(k))
    }

    /// Returns a copy with every field renamed according to `remap`.
    pub fn remap(&self, remap: &KeyRemap) -> SecretMap {
        self.iter()
            .map(|(k, v)| (remap.target_for(k).to_owned(), v.to_owned()))
            .collect()
    }
}

impl fmt::Debug for SecretMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.key_names().into_iter().map(|k| (k, "<redacted>")))
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SecretMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Renames rotation-source fields to the names one destination expects.
///
/// Fields without an entry keep their name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRemap(HashMap<String, String>);

impl KeyRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name `key` is stored under at the destination.
    pub fn target_for<'a>(&'a self, key: &'a str) -> &'a str {
        self.0.get(key).map(String::as_str).unwrap_or(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Destination names that more than one of `keys` would be stored under.
    pub fn collisions(&self, keys: &SecretMap) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut clashes = BTreeSet::new();
        for key in keys.key_names() {
            let target = self.target_for(key);
            if !seen.insert(target) {
                clashes.insert(target.to_owned());
            }
        }
        clashes.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyRemap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
