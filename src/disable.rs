//! Disablement of superseded credential versions
//!
//! The engine only gates the call on dry-run and reports failures; the actual
//! deactivation is delegated to the plugin's [`DisablementSource`]. Plugins
//! decide which versions to touch with [`DisablePolicy::eligible`].

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::context::RunContext;
use crate::plugin::DisablementSource;
use crate::secret::CredentialInfo;

/// Where the disable-after window of an old version starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisableAnchor {
    /// When the next newer version was created.
    #[default]
    Successor,
    /// When the version itself was created, plus the rotation period.
    OwnCreation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisablePolicy {
    pub rotate_after: Duration,
    pub disable_after: Duration,
    pub anchor: DisableAnchor,
}

/// One issued version of a credential, e.g. one IAM access key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersion {
    pub id: String,
    pub created: DateTime<Utc>,
    pub active: bool,
}

impl DisablePolicy {
    /// Versions that may be deactivated now.
    ///
    /// The newest version is never returned, whatever its age. Each older
    /// active version is judged against its immediate successor.
    pub fn eligible<'a>(&self, versions: &'a [KeyVersion], now: DateTime<Utc>) -> Vec<&'a KeyVersion> {
        let mut newest_first: Vec<&KeyVersion> = versions.iter().collect();
        newest_first.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.id.cmp(&a.id)));

        newest_first
            .windows(2)
            .filter_map(|pair| {
                let (successor, version) = (pair[0], pair[1]);
                (version.active && self.window_elapsed(version, successor, now)).then_some(version)
            })
            .collect()
    }

    fn window_elapsed(&self, version: &KeyVersion, successor: &KeyVersion, now: DateTime<Utc>) -> bool {
        match self.anchor {
            DisableAnchor::Successor => elapsed(successor.created, now) >= self.disable_after,
            DisableAnchor::OwnCreation => {
                elapsed(version.created, now) >= self.rotate_after.saturating_add(self.disable_after)
            }
        }
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

/// What a disablement source is asked to act on.
#[derive(Debug, Clone)]
pub struct DisableRequest {
    pub policy: DisablePolicy,
    pub secrets: Vec<CredentialInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableOutcome {
    Disabled,
    Skipped,
}

pub struct DisablementEngine {
    client: Arc<dyn DisablementSource>,
    request: DisableRequest,
    dry_run: bool,
}

impl DisablementEngine {
    pub fn new(
        client: Arc<dyn DisablementSource>,
        policy: DisablePolicy,
        dry_run: bool,
        secrets: Vec<CredentialInfo>,
    ) -> Self {
        Self {
            client,
            request: DisableRequest { policy, secrets },
            dry_run,
        }
    }

    pub async fn disable_secrets(&self, ctx: &RunContext) -> Result<DisableOutcome> {
        let names: Vec<&str> = self.request.secrets.iter().map(CredentialInfo::name).collect();

        if self.dry_run {
            info!(
                client = self.client.name(),
                secrets = ?names,
                disable_after = ?self.request.policy.disable_after,
                "[DRY RUN] would disable superseded credentials"
            );
            return Ok(DisableOutcome::Skipped);
        }

        info!(client = self.client.name(), secrets = ?names, "disabling superseded credentials");
        self.client
            .disable_secrets(ctx, &self.request)
            .await
            .with_context(|| format!("disablement via {} failed", self.client.name()))?;

        Ok(DisableOutcome::Disabled)
    }
}
