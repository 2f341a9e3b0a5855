use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::disable::DisableAnchor;
use crate::plugin::PluginOptions;
use crate::secret::KeyRemap;

const HOUR: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Credentials older than this are rotated.
    #[serde(default = "default_rotate_after", with = "humantime_serde")]
    pub rotate_after: Duration,

    /// Superseded credentials older than this (see [`DisableAnchor`]) are disabled.
    #[serde(default = "default_disable_after", with = "humantime_serde")]
    pub disable_after: Duration,

    /// Options per plugin type id.
    #[serde(default)]
    pub plugins: HashMap<String, PluginOptions>,

    #[serde(default)]
    pub secret_sets: BTreeMap<String, SecretSet>,

    #[serde(default)]
    pub rotations: Vec<Rotation>,

    #[serde(default)]
    pub disablements: Vec<Disablement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretSet {
    #[serde(default)]
    pub secrets: Vec<Secret>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    /// Credential name, e.g. the IAM user.
    pub secret: String,
    #[serde(default)]
    pub storages: Vec<Storage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    /// Destination name, e.g. `owner/repo`.
    pub storage: String,
    /// Plugin type id of the storage sink.
    pub client: String,
    /// Renames from rotation-source field to destination field.
    #[serde(default, skip_serializing_if = "KeyRemap::is_empty")]
    pub keys: KeyRemap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rotation {
    /// Plugin type id of the rotation source.
    pub client: String,
    pub secret_set: String,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub rotate_after: Option<Duration>,
    #[serde(default)]
    pub force_on_missing_keys: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disablement {
    /// Plugin type id of the disablement source.
    pub client: String,
    pub secret_set: String,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub disable_after: Option<Duration>,
    #[serde(default)]
    pub anchor: DisableAnchor,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{kind} #{index} ({client}) refers to unknown secret set {name:?}")]
    UnknownSecretSet {
        kind: &'static str,
        index: usize,
        client: String,
        name: String,
    },

    #[error("{kind} #{index} has an empty client")]
    EmptyClient { kind: &'static str, index: usize },

    #[error("secret set {set:?} contains a secret with an empty name")]
    EmptySecret { set: String },

    #[error("secret {secret:?} in set {set:?} has a storage with an empty {field}")]
    IncompleteStorage {
        set: String,
        secret: String,
        field: &'static str,
    },

    #[error("secret {secret:?} in set {set:?} lists storage {storage:?} more than once")]
    DuplicateStorage {
        set: String,
        secret: String,
        storage: String,
    },
}

fn default_rotate_after() -> Duration {
    Duration::from_secs(168 * HOUR)
}

fn default_disable_after() -> Duration {
    Duration::from_secs(48 * HOUR)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rotate_after: default_rotate_after(),
            disable_after: default_disable_after(),
            plugins: HashMap::new(),
            secret_sets: BTreeMap::new(),
            rotations: Vec::new(),
            disablements: Vec::new(),
        }
    }
}

impl Rotation {
    pub fn rotate_after(&self, config: &Config) -> Duration {
        self.rotate_after.unwrap_or(config.rotate_after)
    }
}

impl Disablement {
    pub fn disable_after(&self, config: &Config) -> Duration {
        self.disable_after.unwrap_or(config.disable_after)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config file")
    }

    /// Look up a secret set by name.
    pub fn secret_set(&self, name: &str) -> Result<&SecretSet> {
        self.secret_sets
            .get(name)
            .with_context(|| format!("unknown secret set {:?}", name))
    }

    /// Every problem with the configuration.
    ///
    /// Problems are reported, not fatal: an entry that refers to something
    /// broken fails on its own when it runs and the others still proceed.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut problems = Vec::new();

        let entries = self
            .rotations
            .iter()
            .map(|r| ("rotation", &r.client, &r.secret_set))
            .chain(
                self.disablements
                    .iter()
                    .map(|d| ("disablement", &d.client, &d.secret_set)),
            );
        let mut counters: HashMap<&'static str, usize> = HashMap::new();
        for (kind, client, set) in entries {
            let counter = counters.entry(kind).or_default();
            let index = *counter;
            *counter += 1;
            if client.trim().is_empty() {
                problems.push(ConfigError::EmptyClient { kind, index });
            }
            if !self.secret_sets.contains_key(set) {
                problems.push(ConfigError::UnknownSecretSet {
                    kind,
                    index,
                    client: client.clone(),
                    name: set.clone(),
                });
            }
        }

        for (set_name, set) in &self.secret_sets {
            for secret in &set.secrets {
                if secret.secret.trim().is_empty() {
                    problems.push(ConfigError::EmptySecret {
                        set: set_name.clone(),
                    });
                }
                let mut seen = Vec::new();
                for storage in &secret.storages {
                    for (field, value) in [("storage", &storage.storage), ("client", &storage.client)] {
                        if value.trim().is_empty() {
                            problems.push(ConfigError::IncompleteStorage {
                                set: set_name.clone(),
                                secret: secret.secret.clone(),
                                field,
                            });
                        }
                    }
                    let key = (&storage.client, &storage.storage);
                    if seen.contains(&key) {
                        problems.push(ConfigError::DuplicateStorage {
                            set: set_name.clone(),
                            secret: secret.secret.clone(),
                            storage: storage.storage.clone(),
                        });
                    } else {
                        seen.push(key);
                    }
                }
            }
        }

        problems
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let toml_string =
            toml::to_string_pretty(&Self::sample()).context("Failed to serialize sample config")?;
        fs::write(path.as_ref(), toml_string)
            .with_context(|| format!("Failed to write sample config to {:?}", path.as_ref()))?;

        Ok(())
    }

    fn sample() -> Self {
        let mut aws = PluginOptions::new();
        aws.insert("region".into(), toml::Value::String("us-east-1".into()));

        let storage = Storage {
            storage: "my-org/my-repo".to_string(),
            client: "github".to_string(),
            keys: [
                ("access_key", "AWS_ACCESS_KEY_ID"),
                ("secret_key", "AWS_SECRET_ACCESS_KEY"),
            ]
            .into_iter()
            .collect(),
        };

        let mut config = Self::default();
        config.plugins.insert("aws-iam".to_string(), aws);
        config.plugins.insert("github".to_string(), PluginOptions::new());
        config.secret_sets.insert(
            "ci".to_string(),
            SecretSet {
                secrets: vec![Secret {
                    secret: "ci-deployer".to_string(),
                    storages: vec![storage],
                }],
            },
        );
        config.rotations.push(Rotation {
            client: "aws-iam".to_string(),
            secret_set: "ci".to_string(),
            rotate_after: None,
            force_on_missing_keys: false,
        });
        config.disablements.push(Disablement {
            client: "aws-iam".to_string(),
            secret_set: "ci".to_string(),
            disable_after: None,
            anchor: DisableAnchor::default(),
        });
        config
    }
}
