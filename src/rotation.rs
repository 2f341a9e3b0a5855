use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::plugin::{RotationSource, StorageSink};
use crate::secret::{CredentialInfo, DestinationRef, KeyRemap, SecretMap};

/// One place a credential's values are stored, with the sink that writes there.
#[derive(Clone)]
pub struct Destination {
    pub target: DestinationRef,
    pub sink: Arc<dyn StorageSink>,
    pub remap: KeyRemap,
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("target", &self.target)
            .field("sink", &self.sink.name())
            .field("remap", &self.remap)
            .finish()
    }
}

/// A credential and every destination it propagates to, in order.
#[derive(Debug, Clone)]
pub struct SecretEntry {
    pub info: CredentialInfo,
    pub destinations: Vec<Destination>,
}

/// Tally of one rotation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Credentials younger than the rotation period.
    pub not_due: usize,
    /// Credentials rotated.
    pub rotated: usize,
    /// Credentials that would have been rotated in a dry run.
    pub planned: usize,
    /// Credentials abandoned: lookup, rotation or contract failure.
    pub failed: usize,
    /// Destinations written.
    pub saved: usize,
    /// Destinations that could not be written after a rotation.
    pub save_failed: usize,
}

impl RotationReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.save_failed == 0
    }
}

/// Check if a credential last rotated at `last_rotated` is due.
///
/// A timestamp in the future counts as age zero.
pub fn needs_rotation(last_rotated: DateTime<Utc>, now: DateTime<Utc>, rotate_after: Duration) -> bool {
    let age = (now - last_rotated).to_std().unwrap_or_default();
    age >= rotate_after
}

pub struct RotationEngine {
    client: Arc<dyn RotationSource>,
    rotate_after: Duration,
    dry_run: bool,
    force_on_missing_keys: bool,
    secrets: Vec<SecretEntry>,
}

impl RotationEngine {
    pub fn new(
        client: Arc<dyn RotationSource>,
        rotate_after: Duration,
        dry_run: bool,
        secrets: Vec<SecretEntry>,
    ) -> Self {
        Self {
            client,
            rotate_after,
            dry_run,
            force_on_missing_keys: false,
            secrets,
        }
    }

    /// Also rotate credentials that are not yet due when a destination is
    /// missing one of their fields or holds a value older than the rotation.
    pub fn force_on_missing_keys(mut self, force: bool) -> Self {
        self.force_on_missing_keys = force;
        self
    }

    /// Processes every configured credential in order. Failures are logged and
    /// counted; they never stop the remaining credentials or destinations.
    pub async fn rotate_secrets(&self, ctx: &RunContext) -> RotationReport {
        let mut report = RotationReport::default();

        for (index, entry) in self.secrets.iter().enumerate() {
            if ctx.is_cancelled() {
                let remaining = self.secrets.len() - index;
                warn!(client = self.client.name(), remaining, "rotation cancelled");
                report.failed += remaining;
                break;
            }
            self.rotate_entry(ctx, entry, &mut report).await;
        }

        report
    }

    async fn rotate_entry(&self, ctx: &RunContext, entry: &SecretEntry, report: &mut RotationReport) {
        let client = self.client.name();
        let secret = entry.info.name();

        let last_rotated = match self.client.last_rotated(ctx, &entry.info).await {
            Ok(at) => at,
            Err(e) => {
                error!(client, secret, error = %format!("{:#}", e), "unable to check last rotation date");
                report.failed += 1;
                return;
            }
        };

        if !needs_rotation(last_rotated, ctx.now(), self.rotate_after) {
            if self.force_on_missing_keys && self.destinations_stale(ctx, entry, last_rotated).await {
                info!(client, secret, "destination out of date; forcing rotation");
            } else {
                debug!(client, secret, last_rotated = %last_rotated, "secret not due for rotation");
                report.not_due += 1;
                return;
            }
        }

        let declared = self.client.keys();
        for dest in &entry.destinations {
            let clashes = dest.remap.collisions(&declared);
            if !clashes.is_empty() {
                error!(
                    client,
                    secret,
                    storage = %dest.target,
                    fields = ?clashes,
                    "key remap stores several fields under one name; not rotating"
                );
                report.failed += 1;
                return;
            }
        }

        if self.dry_run {
            info!(client, secret, last_rotated = %last_rotated, "[DRY RUN] would rotate secret");
            for dest in &entry.destinations {
                info!(
                    client = dest.sink.name(),
                    secret,
                    storage = %dest.target,
                    fields = ?declared.remap(&dest.remap).key_names(),
                    "[DRY RUN] would save keys"
                );
            }
            report.planned += 1;
            return;
        }

        let rotated = match self.client.rotate_secret(ctx, &entry.info).await {
            Ok(values) => values,
            Err(e) => {
                error!(client, secret, error = %format!("{:#}", e), "failed to rotate secret");
                report.failed += 1;
                return;
            }
        };

        if !rotated.same_keys(&declared) {
            error!(
                client,
                secret,
                expected = ?declared.key_names(),
                returned = ?rotated.key_names(),
                "rotation returned a different key set than declared; nothing saved"
            );
            report.failed += 1;
            return;
        }

        info!(client, secret, "rotated secret");
        report.rotated += 1;

        for dest in &entry.destinations {
            let values = rotated.remap(&dest.remap);
            match dest.sink.save_keys(ctx, &dest.target, &values).await {
                Ok(()) => {
                    info!(client = dest.sink.name(), secret, storage = %dest.target, "saved rotated keys");
                    report.saved += 1;
                }
                Err(e) => {
                    error!(
                        client = dest.sink.name(),
                        secret,
                        storage = %dest.target,
                        fields = ?values.key_names(),
                        error = %format!("{:#}", e),
                        "failed to save rotated keys"
                    );
                    report.save_failed += 1;
                }
            }
        }
    }

    /// True when some destination lacks a current copy of a declared field.
    async fn destinations_stale(&self, ctx: &RunContext, entry: &SecretEntry, last_rotated: DateTime<Utc>) -> bool {
        let declared = self.client.keys();
        for dest in &entry.destinations {
            let fields = declared.remap(&dest.remap);
            for field in fields.key_names() {
                match dest.sink.last_saved(ctx, &dest.target, field).await {
                    Ok(Some(saved)) if saved >= last_rotated => {}
                    Ok(_) => {
                        info!(
                            client = dest.sink.name(),
                            secret = entry.info.name(),
                            storage = %dest.target,
                            field,
                            "destination missing current value"
                        );
                        return true;
                    }
                    Err(e) => {
                        warn!(
                            client = dest.sink.name(),
                            secret = entry.info.name(),
                            storage = %dest.target,
                            field,
                            error = %format!("{:#}", e),
                            "unable to check when field was last saved"
                        );
                    }
                }
            }
        }
        false
    }
}
