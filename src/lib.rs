//! Credential rotation library
//!
//! Rotates cloud access credentials, propagates the new values to every
//! configured secret store and disables superseded versions. Back-ends are
//! plugins resolved by type id through a [`PluginRegistry`].

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod disable;
pub mod plugin;
pub mod plugins;
pub mod rotation;
pub mod seal;
pub mod secret;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use context::{Cancelled, RunContext};
pub use disable::{DisableAnchor, DisablePolicy, DisablementEngine};
pub use plugin::{DisablementSource, PluginInstance, PluginRegistry, RotationSource, StorageSink};
pub use rotation::{needs_rotation, RotationEngine, RotationReport};
pub use secret::{CredentialInfo, DestinationRef, KeyRemap, SecretMap};
