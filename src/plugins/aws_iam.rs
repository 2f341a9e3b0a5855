use anyhow::{bail, Context, Result};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_iam::types::{AccessKeyMetadata, StatusType};
use aws_sdk_iam::Client as IamClient;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::disable::{DisablePolicy, DisableRequest, KeyVersion};
use crate::plugin::{DisablementSource, PluginBuilder, PluginInstance, PluginOptions, RotationSource};
use crate::secret::{CredentialInfo, SecretMap};

pub const TYPE_ID: &str = "aws-iam";

/// Field holding the new access key id.
pub const ACCESS_KEY: &str = "access_key";
/// Field holding the new secret access key.
pub const SECRET_KEY: &str = "secret_key";

/// IAM refuses to create a third access key for a user.
const MAX_KEYS_PER_USER: usize = 2;

/// Builds the IAM access key plugin. Option: `region`.
pub struct IamBuilder;

#[async_trait::async_trait]
impl PluginBuilder for IamBuilder {
    async fn build(&self, ctx: &RunContext, options: &PluginOptions) -> Result<PluginInstance> {
        let region = options
            .get("region")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        let client = Arc::new(IamKeys::new(ctx, region).await?);

        Ok(PluginInstance::new()
            .with_rotation_source(client.clone())
            .with_disablement_source(client))
    }
}

/// Rotates and disables AWS IAM user access keys. Credentials are IAM user names.
pub struct IamKeys {
    client: IamClient,
}

fn key_version(meta: &AccessKeyMetadata) -> Option<KeyVersion> {
    let id = meta.access_key_id()?;
    let created = meta.create_date()?;
    Some(KeyVersion {
        id: id.to_owned(),
        created: DateTime::from_timestamp(created.secs(), created.subsec_nanos())?,
        active: matches!(meta.status(), Some(StatusType::Active)),
    })
}

impl IamKeys {
    /// Create a new IAM client from the default AWS credential chain
    pub async fn new(ctx: &RunContext, region: Option<String>) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = ctx.guard(async { Ok::<_, anyhow::Error>(loader.load().await) }).await?;

        Ok(Self {
            client: IamClient::new(&config),
        })
    }

    async fn key_versions(&self, ctx: &RunContext, info: &CredentialInfo) -> Result<Vec<KeyVersion>> {
        let output = ctx
            .guard(async {
                self.client
                    .list_access_keys()
                    .user_name(info.name())
                    .send()
                    .await
                    .with_context(|| format!("Failed to list access keys for IAM user {:?}", info.name()))
            })
            .await?;

        Ok(output
            .access_key_metadata()
            .iter()
            .filter_map(key_version)
            .collect())
    }

    async fn delete_key(&self, ctx: &RunContext, info: &CredentialInfo, key_id: &str) -> Result<()> {
        ctx.guard(async {
            self.client
                .delete_access_key()
                .user_name(info.name())
                .access_key_id(key_id)
                .send()
                .await
                .with_context(|| format!("Failed to delete access key {} of IAM user {:?}", key_id, info.name()))
        })
        .await?;
        Ok(())
    }

    async fn deactivate_key(&self, ctx: &RunContext, info: &CredentialInfo, key_id: &str) -> Result<()> {
        ctx.guard(async {
            self.client
                .update_access_key()
                .user_name(info.name())
                .access_key_id(key_id)
                .status(StatusType::Inactive)
                .send()
                .await
                .with_context(|| {
                    format!("Failed to deactivate access key {} of IAM user {:?}", key_id, info.name())
                })
        })
        .await?;
        Ok(())
    }

    async fn disable_user_keys(
        &self,
        ctx: &RunContext,
        info: &CredentialInfo,
        policy: &DisablePolicy,
    ) -> Result<usize> {
        let versions = self.key_versions(ctx, info).await?;
        let eligible = policy.eligible(&versions, ctx.now());

        for version in &eligible {
            info!(
                client = self.name_str(),
                secret = info.name(),
                key_id = %version.id,
                created = %version.created,
                "disabling access key"
            );
            self.deactivate_key(ctx, info, &version.id).await?;
        }
        Ok(eligible.len())
    }

    fn name_str(&self) -> &'static str {
        "AWS IAM access keys"
    }
}

#[async_trait::async_trait]
impl RotationSource for IamKeys {
    fn name(&self) -> &str {
        self.name_str()
    }

    fn keys(&self) -> SecretMap {
        SecretMap::declare([ACCESS_KEY, SECRET_KEY])
    }

    /// Creation time of the user's newest access key, or the epoch if the
    /// user has none.
    async fn last_rotated(&self, ctx: &RunContext, info: &CredentialInfo) -> Result<DateTime<Utc>> {
        let versions = self.key_versions(ctx, info).await?;
        Ok(versions
            .iter()
            .map(|v| v.created)
            .max()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH))
    }

    async fn rotate_secret(&self, ctx: &RunContext, info: &CredentialInfo) -> Result<SecretMap> {
        let mut versions = self.key_versions(ctx, info).await?;

        if versions.len() >= MAX_KEYS_PER_USER {
            versions.sort_by_key(|v| v.created);
            let Some(stale) = versions.iter().find(|v| !v.active) else {
                bail!(
                    "IAM user {:?} already has {} active access keys; disable the previous key before rotating",
                    info.name(),
                    versions.len()
                );
            };
            warn!(
                client = self.name_str(),
                secret = info.name(),
                key_id = %stale.id,
                "deleting inactive access key to make room for a new one"
            );
            self.delete_key(ctx, info, &stale.id).await?;
        }

        let output = ctx
            .guard(async {
                self.client
                    .create_access_key()
                    .user_name(info.name())
                    .send()
                    .await
                    .with_context(|| format!("Failed to create access key for IAM user {:?}", info.name()))
            })
            .await?;
        let key = output
            .access_key()
            .with_context(|| format!("IAM returned no access key for user {:?}", info.name()))?;

        info!(
            client = self.name_str(),
            secret = info.name(),
            key_id = key.access_key_id(),
            "created access key"
        );

        Ok([
            (ACCESS_KEY, key.access_key_id()),
            (SECRET_KEY, key.secret_access_key()),
        ]
        .into_iter()
        .collect())
    }
}

#[async_trait::async_trait]
impl DisablementSource for IamKeys {
    fn name(&self) -> &str {
        self.name_str()
    }

    async fn disable_secrets(&self, ctx: &RunContext, request: &DisableRequest) -> Result<()> {
        let mut failed = 0;
        for info in &request.secrets {
            match self.disable_user_keys(ctx, info, &request.policy).await {
                Ok(0) => info!(client = self.name_str(), secret = info.name(), "no access keys to disable"),
                Ok(count) => info!(client = self.name_str(), secret = info.name(), count, "disabled access keys"),
                Err(e) => {
                    error!(
                        client = self.name_str(),
                        secret = info.name(),
                        error = %format!("{:#}", e),
                        "failed to disable access keys"
                    );
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            bail!("failed to disable access keys for {} of {} IAM user(s)", failed, request.secrets.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_iam::primitives::DateTime as AwsDateTime;

    #[test]
    fn test_key_version_from_metadata() {
        let meta = AccessKeyMetadata::builder()
            .user_name("ci-deployer")
            .access_key_id("AKIAEXAMPLE")
            .status(StatusType::Active)
            .create_date(AwsDateTime::from_secs(1_700_000_000))
            .build();

        let version = key_version(&meta).unwrap();
        assert_eq!(version.id, "AKIAEXAMPLE");
        assert!(version.active);
        assert_eq!(version.created.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_key_version_inactive() {
        let meta = AccessKeyMetadata::builder()
            .access_key_id("AKIAOLD")
            .status(StatusType::Inactive)
            .create_date(AwsDateTime::from_secs(1_600_000_000))
            .build();

        assert!(!key_version(&meta).unwrap().active);
    }

    #[test]
    fn test_declares_access_key_pair() {
        let config = aws_sdk_iam::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        let keys = IamKeys {
            client: IamClient::from_conf(config),
        };

        let declared = RotationSource::keys(&keys);
        assert_eq!(
            declared.key_names().into_iter().collect::<Vec<_>>(),
            vec![ACCESS_KEY, SECRET_KEY]
        );
    }

    #[test]
    fn test_key_version_requires_id_and_date() {
        let no_id = AccessKeyMetadata::builder()
            .create_date(AwsDateTime::from_secs(1_600_000_000))
            .build();
        assert!(key_version(&no_id).is_none());

        let no_date = AccessKeyMetadata::builder().access_key_id("AKIA").build();
        assert!(key_version(&no_date).is_none());
    }
}
