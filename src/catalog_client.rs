//! HTTP [`Catalog`] client.
//!
//! Talks to the narrow entity API of a metadata service (or to
//! `sti serve catalog`):
//!
//! | Method | Path | Used by |
//! |--------|------|---------|
//! | `GET`  | `/entities/{urn}` | [`Catalog::get`] |
//! | `POST` | `/entities?action=ingest` | [`Catalog::ingest`] |
//! | `POST` | `/entities?action=softDelete` | [`Catalog::soft_delete`] |
//! | `GET`  | `/health` | [`Catalog::health_check`] |
//!
//! Retry strategy:
//! - HTTP 429 or 5xx → retry with exponential backoff (1s, 2s, 4s, … capped at 32s)
//! - HTTP 4xx (not 429) → fail immediately with [`CatalogError::Rejected`]
//! - Network error → retry; reported as `Unreachable` or `Timeout` once exhausted

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use stateful_ingest_core::catalog::{Catalog, EntityRecord, EntitySnapshot, SystemMetadata};
use stateful_ingest_core::error::CatalogError;
use stateful_ingest_core::urn::Urn;

use crate::config::CatalogConfig;

pub struct HttpCatalog {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
    max_retries: u32,
}

impl HttpCatalog {
    pub fn new(base_url: &str, timeout: Duration, max_retries: u32) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid catalog server URL: {}", base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Catalog server URL cannot be used as a base: {}", base_url);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            timeout,
            max_retries,
        })
    }

    pub fn from_config(config: &CatalogConfig, server: &str) -> anyhow::Result<Self> {
        Self::new(
            server,
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    /// `/entities/{urn}`; the URN is percent-encoded as a single segment.
    fn entity_url(&self, urn: &Urn) -> Url {
        self.url(&["entities", urn.as_str()])
    }

    fn action_url(&self, action: &str) -> Url {
        let mut url = self.url(&["entities"]);
        url.query_pairs_mut().append_pair("action", action);
        url
    }

    /// Send with retry/backoff. Returns the first response that is either
    /// successful or a non-retryable client error.
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Response, CatalogError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let message = error_message(response).await;
                        warn!(status = status.as_u16(), attempt, "Catalog request failed, retrying");
                        last_err = Some(CatalogError::Rejected {
                            status: status.as_u16(),
                            message,
                        });
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Catalog request error");
                    last_err = Some(if e.is_timeout() {
                        CatalogError::Timeout(self.timeout)
                    } else {
                        CatalogError::Unreachable(e.to_string())
                    });
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| CatalogError::Unreachable("no attempt was made".to_string())))
    }
}

/// Extract `error.message` from a `{ "error": { "code", "message" } }` body,
/// falling back to the raw text.
async fn error_message(response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(text)
}

async fn expect_success(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(CatalogError::Rejected {
        status: status.as_u16(),
        message: error_message(response).await,
    })
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn ingest(
        &self,
        entity: &EntitySnapshot,
        meta: Option<&SystemMetadata>,
    ) -> Result<(), CatalogError> {
        let url = self.action_url("ingest");
        let body = EntityRecord::new(entity.clone(), meta.cloned());
        let response = self
            .send(|| self.client.post(url.clone()).json(&body))
            .await?;
        expect_success(response).await?;
        Ok(())
    }

    async fn get(&self, urn: &Urn) -> Result<Option<EntityRecord>, CatalogError> {
        let url = self.entity_url(urn);
        let response = self.send(|| self.client.get(url.clone())).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = expect_success(response).await?;
        let record = response
            .json::<EntityRecord>()
            .await
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
        Ok(Some(record))
    }

    async fn soft_delete(
        &self,
        urn: &Urn,
        meta: Option<&SystemMetadata>,
    ) -> Result<(), CatalogError> {
        let url = self.action_url("softDelete");
        let mut body = json!({ "urn": urn });
        if let Some(meta) = meta {
            body["systemMetadata"] =
                serde_json::to_value(meta).map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
        }
        let response = self
            .send(|| self.client.post(url.clone()).json(&body))
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(urn.to_string()));
        }
        expect_success(response).await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), CatalogError> {
        let url = self.url(&["health"]);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CatalogError::Timeout(self.timeout)
                } else {
                    CatalogError::Unreachable(e.to_string())
                }
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CatalogError::Unreachable(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }
}
