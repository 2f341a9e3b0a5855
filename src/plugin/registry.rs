use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{PluginError, PluginInstance};
use crate::context::RunContext;

/// Options table for one plugin type, taken from `[plugins.<type id>]`.
pub type PluginOptions = toml::Table;

/// Factory for a plugin type.
#[async_trait::async_trait]
pub trait PluginBuilder: Send + Sync {
    async fn build(&self, ctx: &RunContext, options: &PluginOptions) -> anyhow::Result<PluginInstance>;
}

/// Maps plugin type ids to builders and memoizes one instance per type id.
///
/// The same type id used by a rotation and a disablement resolves to the same
/// instance, so both share one client and one cache for the whole run.
#[derive(Default)]
pub struct PluginRegistry {
    builders: HashMap<String, Arc<dyn PluginBuilder>>,
    options: HashMap<String, PluginOptions>,
    instances: DashMap<String, Arc<OnceCell<Result<Arc<PluginInstance>, PluginError>>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `type_id` with `builder`, replacing any earlier builder.
    pub fn register<B>(&mut self, type_id: impl Into<String>, builder: B) -> &mut Self
    where
        B: PluginBuilder + 'static,
    {
        let type_id = type_id.into();
        if self.builders.insert(type_id.clone(), Arc::new(builder)).is_some() {
            debug!(plugin = %type_id, "replaced plugin builder");
        }
        self
    }

    /// Sets the options passed to each type's builder.
    pub fn with_options(mut self, options: HashMap<String, PluginOptions>) -> Self {
        self.options = options;
        self
    }

    pub fn is_registered(&self, type_id: &str) -> bool {
        self.builders.contains_key(type_id)
    }

    pub fn type_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Returns the instance for `type_id`, building it on first use.
    ///
    /// Concurrent first calls build exactly once and all receive the same
    /// instance. A failed build is memoized too: every later call for the
    /// type id gets the same error without running the builder again.
    pub async fn instance(
        &self,
        ctx: &RunContext,
        type_id: &str,
    ) -> Result<Arc<PluginInstance>, PluginError> {
        let builder = self
            .builders
            .get(type_id)
            .cloned()
            .ok_or_else(|| PluginError::NotRegistered(type_id.to_owned()))?;

        let cell = self
            .instances
            .entry(type_id.to_owned())
            .or_default()
            .value()
            .clone();

        let outcome = cell
            .get_or_init(|| async {
                info!(plugin = %type_id, "building plugin");
                let options = self.options.get(type_id).cloned().unwrap_or_default();
                let mut built = builder
                    .build(ctx, &options)
                    .await
                    .map_err(|e| PluginError::Build {
                        type_id: type_id.to_owned(),
                        reason: format!("{:#}", e),
                    })?;
                built.type_id = type_id.to_owned();
                Ok::<_, PluginError>(Arc::new(built))
            })
            .await
            .clone();
        outcome
    }
}
