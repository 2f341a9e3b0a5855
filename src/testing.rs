//! Recording fake plugins shared by the unit tests.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::context::RunContext;
use crate::disable::DisableRequest;
use crate::plugin::{DisablementSource, RotationSource, StorageSink};
use crate::secret::{CredentialInfo, DestinationRef, SecretMap};

/// Rotation source with scripted timestamps and failures.
pub(crate) struct FakeRotator {
    keys: Vec<&'static str>,
    returned_keys: Option<Vec<&'static str>>,
    last_rotated: HashMap<String, DateTime<Utc>>,
    lookup_fails: HashSet<String>,
    rotate_fails: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeRotator {
    pub(crate) fn new() -> Self {
        Self {
            keys: vec!["access_key", "secret_key"],
            returned_keys: None,
            last_rotated: HashMap::new(),
            lookup_fails: HashSet::new(),
            rotate_fails: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn rotated_at(mut self, secret: &str, at: DateTime<Utc>) -> Self {
        self.last_rotated.insert(secret.to_string(), at);
        self
    }

    pub(crate) fn lookup_fails(mut self, secret: &str) -> Self {
        self.lookup_fails.insert(secret.to_string());
        self
    }

    pub(crate) fn rotate_fails(mut self, secret: &str) -> Self {
        self.rotate_fails.insert(secret.to_string());
        self
    }

    /// Makes `rotate_secret` return a different key set than `keys()` declares.
    pub(crate) fn returning_keys(mut self, keys: Vec<&'static str>) -> Self {
        self.returned_keys = Some(keys);
        self
    }

    /// Calls in order, formatted as `method:secret`.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn rotations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("rotate:").map(str::to_string))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl RotationSource for FakeRotator {
    fn name(&self) -> &str {
        "fake-rotator"
    }

    fn keys(&self) -> SecretMap {
        SecretMap::declare(self.keys.iter().copied())
    }

    async fn last_rotated(&self, _ctx: &RunContext, info: &CredentialInfo) -> Result<DateTime<Utc>> {
        self.record(format!("last_rotated:{}", info));
        if self.lookup_fails.contains(info.name()) {
            return Err(anyhow!("no such user {}", info));
        }
        Ok(self
            .last_rotated
            .get(info.name())
            .copied()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
    }

    async fn rotate_secret(&self, _ctx: &RunContext, info: &CredentialInfo) -> Result<SecretMap> {
        self.record(format!("rotate:{}", info));
        if self.rotate_fails.contains(info.name()) {
            return Err(anyhow!("limit exceeded for {}", info));
        }
        let keys = self.returned_keys.as_ref().unwrap_or(&self.keys);
        Ok(keys
            .iter()
            .map(|k| (k.to_string(), format!("{}-{}", k.to_uppercase(), info)))
            .collect())
    }
}

/// Storage sink that records every save.
pub(crate) struct FakeSink {
    name: &'static str,
    fails_for: HashSet<String>,
    stored: HashMap<(String, String), DateTime<Utc>>,
    lookup_fails: bool,
    saves: Mutex<Vec<(DestinationRef, SecretMap)>>,
}

impl FakeSink {
    pub(crate) fn new() -> Self {
        Self::named("fake-sink")
    }

    pub(crate) fn named(name: &'static str) -> Self {
        Self {
            name,
            fails_for: HashSet::new(),
            stored: HashMap::new(),
            lookup_fails: false,
            saves: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn fails_for(mut self, destination: &str) -> Self {
        self.fails_for.insert(destination.to_string());
        self
    }

    pub(crate) fn stored(mut self, destination: &str, field: &str, at: DateTime<Utc>) -> Self {
        self.stored
            .insert((destination.to_string(), field.to_string()), at);
        self
    }

    pub(crate) fn lookup_fails(mut self) -> Self {
        self.lookup_fails = true;
        self
    }

    /// Every save attempt, including failed ones.
    pub(crate) fn saves(&self) -> Vec<(DestinationRef, SecretMap)> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl StorageSink for FakeSink {
    fn name(&self) -> &str {
        self.name
    }

    async fn last_saved(
        &self,
        _ctx: &RunContext,
        destination: &DestinationRef,
        field: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        if self.lookup_fails {
            return Err(anyhow!("listing secrets for {} failed", destination));
        }
        Ok(self
            .stored
            .get(&(destination.name().to_string(), field.to_string()))
            .copied())
    }

    async fn save_keys(
        &self,
        _ctx: &RunContext,
        destination: &DestinationRef,
        secrets: &SecretMap,
    ) -> Result<()> {
        self.saves
            .lock()
            .unwrap()
            .push((destination.clone(), secrets.clone()));
        if self.fails_for.contains(destination.name()) {
            return Err(anyhow!("403 Forbidden for {}", destination));
        }
        Ok(())
    }
}

/// Disablement source that records requests.
pub(crate) struct FakeDisabler {
    fail: bool,
    requests: Mutex<Vec<DisableRequest>>,
}

impl FakeDisabler {
    pub(crate) fn new() -> Self {
        Self {
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub(crate) fn last_request(&self) -> Option<DisableRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl DisablementSource for FakeDisabler {
    fn name(&self) -> &str {
        "fake-disabler"
    }

    async fn disable_secrets(&self, _ctx: &RunContext, request: &DisableRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(anyhow!("access denied"));
        }
        Ok(())
    }
}
