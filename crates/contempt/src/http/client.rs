//! Rate-limit aware REST client.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use contempt_proto::{CreateMessage, Disguise, Message, Snowflake};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, ORIGIN};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use super::ratelimit::{RateLimitInfo, RateLimiter, DEFAULT_RETRY_AFTER};
use super::route::Route;
use crate::error::{ClientError, Result};
use crate::gateway::calculate_backoff;
use crate::log_store::LogStore;

/// Upper bound of the delay between retries of a failing request.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Most messages one history request may return.
pub const MAX_MESSAGE_LIMIT: u8 = 100;

/// REST client settings.
#[derive(Clone)]
pub struct HttpConfig {
    /// API root, e.g. `https://discord.com/api/v9`.
    pub base_url: String,
    /// Value of the `Origin` header.
    pub origin: String,
    /// Authorization token.
    pub token: String,
    /// Client identity headers.
    pub disguise: Disguise,
    /// Retries for network failures and 5xx responses.
    pub max_retries: u32,
    /// Delay before the first such retry; later ones double.
    pub retry_base_delay: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl HttpConfig {
    /// Settings with defaults for everything but the endpoint and token.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            origin: contempt_proto::Branch::default().base_url().to_string(),
            token: token.into(),
            disguise: Disguise::default(),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Set the retry policy for network failures and 5xx responses.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }
}

impl std::fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConfig")
            .field("base_url", &self.base_url)
            .field("origin", &self.origin)
            .field("token", &"<redacted>")
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

/// Parameters of a message history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageQuery {
    /// Page size, clamped to `1..=100`.
    pub limit: u8,
    /// Only messages older than this one.
    pub before: Option<Snowflake>,
    /// Only messages newer than this one.
    pub after: Option<Snowflake>,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            before: None,
            after: None,
        }
    }
}

impl MessageQuery {
    /// Query for the newest `limit` messages.
    #[must_use]
    pub fn latest(limit: u8) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Restrict to messages older than `message`.
    #[must_use]
    pub const fn before(mut self, message: Snowflake) -> Self {
        self.before = Some(message);
        self
    }

    /// Restrict to messages newer than `message`.
    #[must_use]
    pub const fn after(mut self, message: Snowflake) -> Self {
        self.after = Some(message);
        self
    }

    fn to_pairs(self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("limit", self.limit.clamp(1, MAX_MESSAGE_LIMIT).to_string())];
        if let Some(before) = self.before {
            pairs.push(("before", before.to_string()));
        }
        if let Some(after) = self.after {
            pairs.push(("after", after.to_string()));
        }
        pairs
    }
}

/// REST client attaching the disguise headers to every request.
///
/// A 429 suspends its bucket for the server's retry-after and the request
/// is retried once. Network failures and 5xx responses are retried up to
/// `max_retries` times with exponential backoff. Other error statuses are
/// returned as [`ClientError::Http`] with the body verbatim.
pub struct HttpClient {
    http: reqwest::Client,
    config: HttpConfig,
    limiter: RateLimiter,
    log: Option<Arc<LogStore>>,
}

impl HttpClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the token or a disguise header is not a valid
    /// header value, or the underlying client cannot be built.
    pub fn new(config: HttpConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(default_headers(&config)?)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            limiter: RateLimiter::new(),
            log: None,
        })
    }

    /// Record every request in `log`.
    #[must_use]
    pub fn with_log_store(mut self, log: Arc<LogStore>) -> Self {
        self.log = Some(log);
        self
    }

    /// Client settings.
    #[must_use]
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Bucket suspensions shared by every request of this client.
    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Absolute URL of `route`.
    ///
    /// # Errors
    ///
    /// Returns an error if the result is not a valid URL.
    pub fn url(&self, route: &Route) -> Result<Url> {
        let base = self.config.base_url.trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{}", route.path()))?)
    }

    /// Send a request and return the response body of a 2xx.
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        route: &Route,
        query: &[(&'static str, String)],
        body: Option<&B>,
    ) -> Result<String> {
        let url = self.url(route)?;
        let mut rate_limited = false;
        let mut failures = 0u32;

        loop {
            self.limiter.acquire(route.bucket()).await;

            let mut request = self.http.request(route.method().clone(), url.clone());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    self.record(route, &url, None);
                    self.back_off(route, &mut failures, e).await?;
                    continue;
                }
            };

            let status = response.status();
            self.record(route, &url, Some(status.as_u16()));
            let headers = response.headers().clone();
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    self.back_off(route, &mut failures, e).await?;
                    continue;
                }
            };
            let info = RateLimitInfo::from_response(&headers, &text);

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = info.retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
                if info.global {
                    self.limiter.suspend_global(retry_after);
                } else {
                    self.limiter.suspend(route.bucket(), retry_after);
                }
                if rate_limited {
                    return Err(ClientError::RateLimited {
                        bucket: route.bucket().to_string(),
                        retry_after,
                    });
                }
                rate_limited = true;
                warn!(
                    %route,
                    retry_after_ms = retry_after.as_millis() as u64,
                    global = info.global,
                    "rate limited"
                );
                continue;
            }

            self.limiter.observe(route.bucket(), &info);

            if status.is_server_error() {
                failures += 1;
                if failures > self.config.max_retries {
                    return Err(ClientError::Http {
                        status: status.as_u16(),
                        body: text,
                    });
                }
                let delay = self.retry_delay(failures);
                warn!(
                    %route,
                    status = status.as_u16(),
                    attempt = failures,
                    delay_ms = delay.as_millis() as u64,
                    "server error, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                return Err(ClientError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }

            debug!(%route, status = status.as_u16(), "request complete");
            return Ok(text);
        }
    }

    /// `GET` `route` and decode the JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, route: &Route) -> Result<T> {
        let text = self.request::<()>(route, &[], None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// A page of a channel's messages, newest first as the server returns them.
    pub async fn fetch_messages(&self, channel: Snowflake, query: MessageQuery) -> Result<Vec<Message>> {
        let route = Route::get(format!("/channels/{channel}/messages"));
        let text = self.request::<()>(&route, &query.to_pairs(), None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Post `content` to a channel with a fresh nonce.
    pub async fn send_message(&self, channel: Snowflake, content: &str) -> Result<Message> {
        let body = CreateMessage::new(content, new_nonce().to_string());
        let route = Route::post(format!("/channels/{channel}/messages"));
        let text = self.request(&route, &[], Some(&body)).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Count a network failure and wait before the next attempt, or return
    /// the error once retries are spent.
    async fn back_off(&self, route: &Route, failures: &mut u32, error: reqwest::Error) -> Result<()> {
        *failures += 1;
        if *failures > self.config.max_retries {
            return Err(error.into());
        }
        let delay = self.retry_delay(*failures);
        warn!(
            %route,
            attempt = *failures,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "request failed, retrying"
        );
        tokio::time::sleep(delay).await;
        Ok(())
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.config.retry_base_delay, MAX_RETRY_DELAY, 2.0)
    }

    fn record(&self, route: &Route, url: &Url, status: Option<u16>) {
        if let Some(log) = &self.log {
            log.record_http(route.method().as_str(), url.as_str(), status);
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A snowflake for the current time with random low bits, as the official
/// client generates them.
fn new_nonce() -> Snowflake {
    let now = Snowflake::from_timestamp(Utc::now()).get();
    Snowflake::new(now | rand::thread_rng().gen_range(0..1 << 22))
}

fn default_headers(config: &HttpConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, value) in config.disguise.headers()? {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::Config(format!("invalid header name {name}: {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| ClientError::Config(format!("invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }

    let origin = HeaderValue::from_str(&config.origin)
        .map_err(|e| ClientError::Config(format!("invalid origin: {e}")))?;
    headers.insert(ORIGIN, origin);

    let mut token = HeaderValue::from_str(&config.token)
        .map_err(|_| ClientError::Config("token is not a valid header value".to_string()))?;
    token.set_sensitive(true);
    headers.insert(AUTHORIZATION, token);

    Ok(headers)
}
