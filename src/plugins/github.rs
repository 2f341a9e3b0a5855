use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cache::SavedAtCache;
use crate::context::RunContext;
use crate::plugin::{PluginBuilder, PluginInstance, PluginOptions, StorageSink};
use crate::seal::{self, SealError, KEY_SIZE};
use crate::secret::{DestinationRef, SecretMap};

pub const TYPE_ID: &str = "github";

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const TOKEN_ENV: &str = "GITHUB_TOKEN";
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const PAGE_SIZE: usize = 100;

/// Builds the GitHub Actions secrets sink.
///
/// Requires a `GITHUB_TOKEN` with permission to update repository secrets.
/// Options: `base_url` (for GitHub Enterprise) and `timeout_seconds`.
pub struct GithubBuilder;

#[async_trait::async_trait]
impl PluginBuilder for GithubBuilder {
    async fn build(&self, _ctx: &RunContext, options: &PluginOptions) -> Result<PluginInstance> {
        let token = std::env::var(TOKEN_ENV)
            .with_context(|| format!("{} environment variable not set", TOKEN_ENV))?;
        let base_url = options
            .get("base_url")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_BASE_URL);
        let timeout = options
            .get("timeout_seconds")
            .and_then(|v| v.as_integer())
            .and_then(|secs| u64::try_from(secs).ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS);

        let sink = GithubSecrets::new(base_url, token, Duration::from_secs(timeout))?;
        Ok(PluginInstance::new().with_storage_sink(Arc::new(sink)))
    }
}

/// Stores secrets as GitHub Actions repository secrets.
///
/// Destinations are `owner/repo`. Values are sealed with the repository's
/// public key before they leave the process.
pub struct GithubSecrets {
    client: Client,
    base_url: String,
    token: String,
    cache: SavedAtCache,
}

#[derive(Debug, Deserialize)]
struct RepoPublicKey {
    key_id: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct SecretList {
    total_count: usize,
    secrets: Vec<RepoSecret>,
}

#[derive(Debug, Deserialize)]
struct RepoSecret {
    name: String,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct SecretUpdate<'a> {
    encrypted_value: String,
    key_id: &'a str,
}

fn sealed_update<'a>(
    recipient: &[u8; KEY_SIZE],
    key_id: &'a str,
    value: &str,
) -> Result<SecretUpdate<'a>, SealError> {
    Ok(SecretUpdate {
        encrypted_value: seal::seal_base64(recipient, value.as_bytes())?,
        key_id,
    })
}

/// Splits `owner/repo`.
fn repo_parts(destination: &DestinationRef) -> Result<(&str, &str)> {
    match destination.name().split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner, repo))
        }
        _ => bail!(
            "storage {:?} is not a GitHub repository of the form owner/repo",
            destination.name()
        ),
    }
}

/// GitHub secret name for `field`.
///
/// GitHub stores names uppercased. Only ASCII letters, digits and underscores
/// are allowed and a name may not start with a digit, so a name always forms a
/// single URL path segment.
fn secret_name(field: &str) -> Result<String> {
    let valid = !field.is_empty()
        && !field.starts_with(|c: char| c.is_ascii_digit())
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        bail!(
            "{:?} is not a valid GitHub secret name (letters, digits and underscores only)",
            field
        );
    }
    Ok(field.to_ascii_uppercase())
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("GitHub request failed with status {}: {}", status, body);
    }
    Ok(response)
}

impl GithubSecrets {
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keyrot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            cache: SavedAtCache::new(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        debug!("Calling GitHub endpoint: {} {}", method, url);
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, usize)]) -> Result<T> {
        let response = self
            .request(Method::GET, path)
            .query(query)
            .send()
            .await
            .context("Failed to send GitHub request")?;
        check_status(response)
            .await?
            .json()
            .await
            .context("Failed to parse GitHub response")
    }

    /// Lists every action secret of the repository into the cache.
    async fn load_secrets(&self, ctx: &RunContext, destination: &DestinationRef) -> Result<()> {
        let (owner, repo) = repo_parts(destination)?;
        let path = format!("repos/{}/{}/actions/secrets", owner, repo);

        let mut page = 1;
        let mut listed = 0;
        loop {
            let list: SecretList = ctx
                .guard(self.get_json(&path, &[("per_page", PAGE_SIZE), ("page", page)]))
                .await
                .with_context(|| format!("failed to list action secrets for {}", destination))?;

            let count = list.secrets.len();
            for secret in list.secrets {
                self.cache
                    .set(destination, &secret.name.to_ascii_uppercase(), secret.updated_at);
            }
            listed += count;
            if count == 0 || listed >= list.total_count {
                break;
            }
            page += 1;
        }

        debug!(storage = %destination, listed, "cached action secret timestamps");
        self.cache.mark_loaded(destination);
        Ok(())
    }

    async fn put_secret(&self, path: &str, update: &SecretUpdate<'_>) -> Result<()> {
        let response = self
            .request(Method::PUT, path)
            .json(update)
            .send()
            .await
            .context("Failed to send GitHub request")?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageSink for GithubSecrets {
    fn name(&self) -> &str {
        "github action secrets"
    }

    async fn last_saved(
        &self,
        ctx: &RunContext,
        destination: &DestinationRef,
        field: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let field = secret_name(field)?;
        let field = field.as_str();
        if let Some(at) = self.cache.get(destination, field) {
            return Ok(Some(at));
        }
        if self.cache.is_loaded(destination) {
            return Ok(None);
        }

        self.load_secrets(ctx, destination).await?;
        Ok(self.cache.get(destination, field))
    }

    async fn save_keys(
        &self,
        ctx: &RunContext,
        destination: &DestinationRef,
        secrets: &SecretMap,
    ) -> Result<()> {
        let (owner, repo) = repo_parts(destination)?;
        let mut fields = secrets
            .iter()
            .map(|(field, value)| Ok::<_, anyhow::Error>((secret_name(field)?, value)))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("refusing to save secrets to {}", destination))?;
        fields.sort_unstable();

        let public_key: RepoPublicKey = ctx
            .guard(self.get_json(&format!("repos/{}/{}/actions/secrets/public-key", owner, repo), &[]))
            .await
            .with_context(|| format!("failed to retrieve public key for {}", destination))?;
        let recipient = seal::public_key_from_base64(&public_key.key)
            .with_context(|| format!("invalid public key for {}", destination))?;

        for (field, value) in &fields {
            let update = sealed_update(&recipient, &public_key.key_id, value)
                .with_context(|| format!("failed to encrypt secret {:?} for {}", field, destination))?;

            info!(
                client = self.name(),
                storage = %destination,
                secret = %field,
                "updating github action secret"
            );

            let path = format!("repos/{}/{}/actions/secrets/{}", owner, repo, field);
            ctx.guard(self.put_secret(&path, &update))
                .await
                .with_context(|| {
                    format!(
                        "failed to create or update github action secret {:?} for {}",
                        field, destination
                    )
                })?;

            self.cache.set(destination, field, ctx.now());
        }

        Ok(())
    }
}
