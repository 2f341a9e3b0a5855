//! Plugin capability contracts
//!
//! A plugin provides one or more capabilities: minting new credentials
//! ([`RotationSource`]), storing them somewhere ([`StorageSink`]) and
//! deactivating old credential versions ([`DisablementSource`]). The engines
//! only ever see these traits, so back-ends can be swapped through
//! configuration alone.

mod registry;

pub use registry::{PluginBuilder, PluginOptions, PluginRegistry};

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::context::RunContext;
use crate::disable::DisableRequest;
use crate::secret::{CredentialInfo, DestinationRef, SecretMap};

/// Implemented by plugins that rotate credentials.
#[async_trait::async_trait]
pub trait RotationSource: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Every field [`rotate_secret`](Self::rotate_secret) returns. Values are
    /// placeholders; all keys are required, none are optional.
    fn keys(&self) -> SecretMap;

    /// When the credential was most recently rotated.
    async fn last_rotated(&self, ctx: &RunContext, info: &CredentialInfo)
        -> Result<DateTime<Utc>>;

    /// Rotates the credential immediately and returns all the new values.
    async fn rotate_secret(&self, ctx: &RunContext, info: &CredentialInfo) -> Result<SecretMap>;
}

/// Implemented by plugins that store rotated values.
#[async_trait::async_trait]
pub trait StorageSink: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// When `field` was last stored at `destination`, or `None` if it never was.
    async fn last_saved(
        &self,
        ctx: &RunContext,
        destination: &DestinationRef,
        field: &str,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Stores every entry of `secrets`, already remapped to destination field
    /// names. Saving identical values again must be harmless.
    async fn save_keys(
        &self,
        ctx: &RunContext,
        destination: &DestinationRef,
        secrets: &SecretMap,
    ) -> Result<()>;
}

/// Implemented by plugins that deactivate superseded credential versions.
#[async_trait::async_trait]
pub trait DisablementSource: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Deactivates every version of the requested credentials that the
    /// request's policy deems eligible.
    async fn disable_secrets(&self, ctx: &RunContext, request: &DisableRequest) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Rotation,
    Storage,
    Disablement,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Rotation => "rotation source",
            Capability::Storage => "storage sink",
            Capability::Disablement => "disablement source",
        })
    }
}

#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("no plugin registered for type {0:?}")]
    NotRegistered(String),

    #[error("failed to build plugin {type_id:?}: {reason}")]
    Build { type_id: String, reason: String },

    #[error("plugin {plugin:?} is not a {capability}")]
    Unsupported {
        plugin: String,
        capability: Capability,
    },
}

/// A built plugin, tagged with the capabilities it provides.
#[derive(Clone, Default)]
pub struct PluginInstance {
    type_id: String,
    rotation: Option<Arc<dyn RotationSource>>,
    storage: Option<Arc<dyn StorageSink>>,
    disablement: Option<Arc<dyn DisablementSource>>,
}

impl PluginInstance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rotation_source(mut self, source: Arc<dyn RotationSource>) -> Self {
        self.rotation = Some(source);
        self
    }

    pub fn with_storage_sink(mut self, sink: Arc<dyn StorageSink>) -> Self {
        self.storage = Some(sink);
        self
    }

    pub fn with_disablement_source(mut self, source: Arc<dyn DisablementSource>) -> Self {
        self.disablement = Some(source);
        self
    }

    /// Registry type id this instance was built for.
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps = Vec::new();
        if self.rotation.is_some() {
            caps.push(Capability::Rotation);
        }
        if self.storage.is_some() {
            caps.push(Capability::Storage);
        }
        if self.disablement.is_some() {
            caps.push(Capability::Disablement);
        }
        caps
    }

    pub fn rotation_source(&self) -> Result<Arc<dyn RotationSource>, PluginError> {
        self.rotation
            .clone()
            .ok_or_else(|| self.unsupported(Capability::Rotation))
    }

    pub fn storage_sink(&self) -> Result<Arc<dyn StorageSink>, PluginError> {
        self.storage
            .clone()
            .ok_or_else(|| self.unsupported(Capability::Storage))
    }

    pub fn disablement_source(&self) -> Result<Arc<dyn DisablementSource>, PluginError> {
        self.disablement
            .clone()
            .ok_or_else(|| self.unsupported(Capability::Disablement))
    }

    fn unsupported(&self, capability: Capability) -> PluginError {
        PluginError::Unsupported {
            plugin: self.type_id.clone(),
            capability,
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("type_id", &self.type_id)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
