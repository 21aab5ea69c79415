use crate::application_port::*;
use crate::domain_model::UserId;
use anyhow::{Context, anyhow};
use chrono::Duration;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Answers from an RBAC service living in the same process.
pub struct LocalRbacQuery {
    rbac: Arc<dyn RbacService>,
}

impl LocalRbacQuery {
    pub fn new(rbac: Arc<dyn RbacService>) -> Self {
        Self { rbac }
    }
}

#[async_trait::async_trait]
impl RbacQuery for LocalRbacQuery {
    async fn list_roles_for_user(&self, user_id: UserId) -> anyhow::Result<Vec<String>> {
        let roles = self.rbac.list_roles_for_user(user_id).await?;
        Ok(roles.into_iter().map(|r| r.name).collect())
    }

    async fn list_permissions_for_user(&self, user_id: UserId) -> anyhow::Result<Vec<String>> {
        let perms = self.rbac.list_permissions_for_user(user_id).await?;
        Ok(perms.into_iter().map(|p| p.name).collect())
    }
}

/// Subject used when one service calls another on its own behalf.
pub const SERVICE_SUBJECT: UserId = UserId(uuid::Uuid::nil());

const SERVICE_TOKEN_TTL_SECS: i64 = 30;

#[derive(Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<EnvelopeError>,
}

#[derive(Deserialize)]
struct EnvelopeError {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

/// Talks to a remote RBAC service over its JSON API.
pub struct HttpRbacQuery {
    client: Client,
    base_url: String,
    codec: Arc<dyn TokenCodec>,
}

impl HttpRbacQuery {
    pub fn new(
        base_url: &str,
        codec: Arc<dyn TokenCodec>,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building rbac http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            codec,
        })
    }

    fn service_token(&self) -> anyhow::Result<String> {
        let (token, _) = self.codec.issue_access_token(
            SERVICE_SUBJECT,
            &[],
            &[],
            Duration::seconds(SERVICE_TOKEN_TTL_SECS),
        )?;
        Ok(token.0)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> anyhow::Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(self.service_token()?)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("rbac request to {} failed: {}", url, e);
                anyhow!("rbac request failed: {}", e)
            })?;

        let status = response.status();
        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("decoding rbac response from {} ({})", url, status))?;

        match envelope {
            Envelope {
                success: true,
                data: Some(data),
                ..
            } => Ok(data),
            Envelope {
                error: Some(err), ..
            } => Err(anyhow!("rbac {}: {}", err.code, err.message)),
            _ => Err(anyhow!("rbac returned an empty response ({})", status)),
        }
    }
}

#[async_trait::async_trait]
impl RbacQuery for HttpRbacQuery {
    async fn list_roles_for_user(&self, user_id: UserId) -> anyhow::Result<Vec<String>> {
        let roles: Vec<Named> = self
            .get(&format!("/users/{}/roles", user_id))
            .await?;
        Ok(roles.into_iter().map(|r| r.name).collect())
    }

    async fn list_permissions_for_user(&self, user_id: UserId) -> anyhow::Result<Vec<String>> {
        let perms: Vec<Named> = self
            .get(&format!("/users/{}/permissions", user_id))
            .await?;
        Ok(perms.into_iter().map(|p| p.name).collect())
    }
}
