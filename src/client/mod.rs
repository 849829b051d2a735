//! Rate-limited content API client.
//!
//! Authenticates with OAuth2 client credentials, caches the bearer token
//! until shortly before expiry, and maps remote failures onto the error
//! taxonomy so the executor can decide what is retryable. The client
//! itself never retries.
//!
//! Two independent brakes apply to every call:
//! - [`RateLimiter`]: sliding-window quota across the whole process
//! - a semaphore bounding simultaneous in-flight requests

pub mod rate_limit;

pub use rate_limit::RateLimiter;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::Instant;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{ClientConfig, Item, RateLimitConfig, SortMode, TimeFilter};

/// Outcome of one batch fetch.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Items that decoded cleanly
    pub items: Vec<Item>,
    /// Entries dropped as individually malformed
    pub skipped: usize,
}

/// Seam between the crawler and the network client.
#[async_trait]
pub trait PostApi: Send + Sync {
    /// Fetch one batch of posts for a source.
    async fn fetch_batch(
        &self,
        source: &str,
        limit: u32,
        sort: SortMode,
        time_filter: TimeFilter,
    ) -> Result<FetchOutcome>;
}

/// Cached bearer credential.
#[derive(Debug)]
struct BearerToken {
    secret: String,
    expires_at: Instant,
}

/// OAuth2 client-credentials HTTP client for the content API.
#[derive(Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    config: ClientConfig,
    limiter: Arc<RateLimiter>,
    in_flight: Semaphore,
    token: RwLock<Option<BearerToken>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Wire envelope returned by the batch endpoint.
#[derive(Deserialize)]
struct BatchEnvelope {
    items: Vec<serde_json::Value>,
}

/// One post as the remote API ships it. Fields the pipeline requires are
/// options here so a single bad entry degrades to `skipped` instead of
/// failing the whole decode.
#[derive(Deserialize)]
struct WirePost {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    body: String,
    community_id: Option<String>,
    created_utc: Option<f64>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    comment_count: u32,
}

impl ApiClient {
    /// Create a client sharing the given rate limiter.
    pub fn new(config: ClientConfig, rate_limit: &RateLimitConfig) -> Result<Self> {
        Self::with_limiter(config, Arc::new(RateLimiter::new(rate_limit)))
    }

    /// Create a client with an externally owned rate limiter.
    pub fn with_limiter(config: ClientConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        // Reject unparseable endpoints at construction, not on the
        // first outbound call.
        Url::parse(&config.token_url)?;
        Url::parse(&config.api_base)?;

        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let in_flight = Semaphore::new(config.max_concurrency);
        Ok(Self {
            http,
            config,
            limiter,
            in_flight,
            token: RwLock::new(None),
        })
    }

    /// Obtain and cache a bearer credential.
    ///
    /// Token calls consume a rate-limiter slot like any other outbound
    /// call. In-flight requests keep using the credential they already
    /// copied out; nothing blocks on the refresh.
    pub async fn authenticate(&self) -> Result<String> {
        self.limiter.acquire().await?;

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::auth(format!(
                "token endpoint rejected credentials ({})",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::remote(status.as_u16(), body));
        }

        let decoded: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::malformed(format!("token response: {e}")))?;

        let skew = Duration::from_secs(self.config.token_refresh_skew_secs);
        let lifetime = Duration::from_secs(decoded.expires_in).saturating_sub(skew);
        let secret = decoded.access_token.clone();

        let mut slot = self.token.write().await;
        *slot = Some(BearerToken {
            secret: decoded.access_token,
            expires_at: Instant::now() + lifetime,
        });

        log::debug!("Obtained bearer token, valid for {:?}", lifetime);
        Ok(secret)
    }

    /// Current bearer secret, refreshing if expired or absent.
    async fn bearer(&self) -> Result<String> {
        {
            let token = self.token.read().await;
            if let Some(token) = token.as_ref() {
                if token.expires_at > Instant::now() {
                    return Ok(token.secret.clone());
                }
            }
        }
        self.authenticate().await
    }

    /// Drop the cached token so the next call re-authenticates.
    async fn invalidate_token(&self) {
        let mut slot = self.token.write().await;
        *slot = None;
    }

    fn batch_url(&self, source: &str, limit: u32, sort: SortMode, filter: TimeFilter) -> String {
        format!(
            "{}/communities/{}/posts?limit={}&sort={}&t={}",
            self.config.api_base.trim_end_matches('/'),
            source,
            limit,
            sort.as_str(),
            filter.as_str()
        )
    }
}

#[async_trait]
impl PostApi for ApiClient {
    async fn fetch_batch(
        &self,
        source: &str,
        limit: u32,
        sort: SortMode,
        time_filter: TimeFilter,
    ) -> Result<FetchOutcome> {
        let _permit = self
            .in_flight
            .acquire()
            .await
            .map_err(|_| AppError::cancelled("client shut down"))?;

        let token = self.bearer().await?;
        self.limiter.acquire().await?;

        let url = self.batch_url(source, limit, sort, time_filter);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            self.invalidate_token().await;
            return Err(AppError::auth(format!(
                "credential rejected for {} ({})",
                source, status
            )));
        }
        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::remote(status.as_u16(), body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::malformed(format!(
                "unexpected status {} for {}: {}",
                status, source, body
            )));
        }

        let envelope: BatchEnvelope = response
            .json()
            .await
            .map_err(|e| AppError::malformed(format!("batch envelope for {}: {e}", source)))?;

        Ok(decode_batch(source, envelope.items))
    }
}

/// Decode wire entries, skipping individually malformed ones.
fn decode_batch(source: &str, raw: Vec<serde_json::Value>) -> FetchOutcome {
    let fetched_at = Utc::now();
    let mut outcome = FetchOutcome::default();

    for value in raw {
        match serde_json::from_value::<WirePost>(value) {
            Ok(post) => match wire_to_item(source, post, fetched_at) {
                Ok(item) => outcome.items.push(item),
                Err(e) => {
                    outcome.skipped += 1;
                    log::warn!("Skipping malformed post from {}: {}", source, e);
                }
            },
            Err(e) => {
                outcome.skipped += 1;
                log::warn!("Skipping undecodable post from {}: {}", source, e);
            }
        }
    }

    outcome
}

fn wire_to_item(source: &str, post: WirePost, fetched_at: DateTime<Utc>) -> Result<Item> {
    let id = post
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::validation("post missing id"))?;
    let title = post
        .title
        .ok_or_else(|| AppError::validation("post missing title"))?;
    let created_secs = post
        .created_utc
        .ok_or_else(|| AppError::validation("post missing created_utc"))?;
    let created_at = Utc
        .timestamp_opt(created_secs as i64, 0)
        .single()
        .ok_or_else(|| AppError::validation("post timestamp out of range"))?;

    let mut item = Item {
        source: source.to_string(),
        source_item_id: id,
        version: 1,
        created_at,
        fetched_at,
        title,
        body: post.body,
        body_normalized: String::new(),
        content_hash: String::new(),
        community_id: post.community_id.unwrap_or_default(),
        score: post.score,
        comment_count: post.comment_count,
        is_current: true,
        duplicate_refs: 0,
    };
    item.finalize();
    Ok(item)
}

/// Map a transport-level reqwest error onto the taxonomy.
fn classify_transport(error: reqwest::Error) -> AppError {
    if error.is_timeout() || error.is_connect() {
        AppError::remote(0, error)
    } else {
        AppError::Http(error)
    }
}
