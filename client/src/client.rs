use crate::{events::Stream, Error, Result};
use gridstake_types::{Action, Identity, SessionRecord, Submission};
use reqwest::Client as HttpClient;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn join_identity_path(base: &Url, prefix: &str, identity: &Identity) -> Result<Url> {
    Ok(base.join(&format!("{prefix}/{identity}"))?)
}

/// Retry policy for transient HTTP failures.
///
/// Defaults to a single attempt: reads and writes alike surface transient
/// failures to the caller instead of retrying behind its back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
    /// Whether non-idempotent requests (e.g., POST) may be retried.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_non_idempotent: false,
        }
    }
}

/// Gridstake ledger API client, bound to one connected identity.
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub ws_url: Url,
    pub http_client: HttpClient,

    pub identity: Identity,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    pub fn new(base_url: &str, identity: Identity) -> Result<Self> {
        let base_url = Url::parse(base_url)?;

        // Convert http(s) to ws(s) for WebSocket URL
        let ws_scheme = match base_url.scheme() {
            "http" => "ws",
            "https" => "wss",
            scheme => {
                return Err(Error::InvalidScheme(scheme.to_string()));
            }
        };

        let mut ws_url = base_url.clone();
        ws_url
            .set_scheme(ws_scheme)
            .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url,
            ws_url,
            http_client,
            identity,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Sets the retry policy for subsequent HTTP requests.
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) {
        self.retry_policy = retry_policy;
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub(crate) async fn get_with_retry(&self, url: Url) -> Result<reqwest::Response> {
        self.send_with_retry(reqwest::Method::GET, || self.http_client.get(url.clone()))
            .await
    }

    pub(crate) async fn post_json_with_retry<T: serde::Serialize + ?Sized>(
        &self,
        url: Url,
        body: &T,
    ) -> Result<()> {
        let response = self
            .send_with_retry(reqwest::Method::POST, || {
                self.http_client.post(url.clone()).json(body)
            })
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        // The ledger answers rejections with a plain-text reason, surfaced
        // to the caller verbatim.
        if status.is_client_error() {
            if let Ok(reason) = response.text().await {
                if !reason.is_empty() {
                    return Err(Error::Rejected(reason));
                }
            }
        }
        Err(Error::Failed(status))
    }

    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts =
            if method == reqwest::Method::GET || self.retry_policy.retry_non_idempotent {
                self.retry_policy.max_attempts.max(1)
            } else {
                1
            };

        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            let result = make_request().send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    /// Fetch the authoritative session record for the connected identity.
    /// Returns `None` when the ledger has no record yet.
    pub async fn session(&self) -> Result<Option<SessionRecord>> {
        let url = join_identity_path(&self.base_url, "session", &self.identity)?;
        let response = self.get_with_retry(url).await?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let buf = response.bytes().await?;
                let record: SessionRecord = serde_json::from_slice(&buf)?;
                Ok(Some(record))
            }
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            _ => Err(Error::Failed(response.status())),
        }
    }

    /// Fetch the withdrawable balance for the connected identity.
    pub async fn balance(&self) -> Result<u64> {
        let url = join_identity_path(&self.base_url, "balance", &self.identity)?;
        let response = self.get_with_retry(url).await?;

        match response.status() {
            reqwest::StatusCode::OK => {
                let buf = response.bytes().await?;
                Ok(serde_json::from_slice(&buf)?)
            }
            _ => Err(Error::Failed(response.status())),
        }
    }

    /// Open a new match, wagering `stake`.
    pub async fn start_match(&self, stake: u64) -> Result<()> {
        self.submit(Action::StartMatch { stake }).await
    }

    /// Place the player's mark at `cell`, budgeting `budget` execution for
    /// the house reply computed within the same submission.
    pub async fn submit_move(&self, cell: u8, budget: u64) -> Result<()> {
        self.submit(Action::Move { cell, budget }).await
    }

    /// Collect the payout of a settled, won match.
    pub async fn claim_prize(&self) -> Result<()> {
        self.submit(Action::ClaimPrize).await
    }

    /// Drain the accumulated non-game balance.
    pub async fn withdraw(&self) -> Result<()> {
        self.submit(Action::Withdraw).await
    }

    async fn submit(&self, action: Action) -> Result<()> {
        let submission = Submission {
            identity: self.identity,
            action,
        };
        let url = self.base_url.join("submit")?;
        debug!("Submitting to {}", url);

        self.post_json_with_retry(url, &submission).await
    }

    /// Connect to the notification stream for the connected identity.
    pub async fn connect_notifications(&self) -> Result<Stream> {
        let ws_url = join_identity_path(&self.ws_url, "updates", &self.identity)?;
        info!(ws_url = %ws_url, "Connecting to updates WebSocket");

        let (ws_stream, _) = timeout(TIMEOUT, connect_async(ws_url.as_str()))
            .await
            .map_err(|_| Error::DialTimeout)??;
        info!("WebSocket connected");

        Ok(Stream::new(ws_stream))
    }

    /// Connect to the notification stream with a configurable channel
    /// capacity. A `channel_capacity` of `0` uses the default capacity.
    pub async fn connect_notifications_with_capacity(
        &self,
        channel_capacity: usize,
    ) -> Result<Stream> {
        let ws_url = join_identity_path(&self.ws_url, "updates", &self.identity)?;
        info!(ws_url = %ws_url, "Connecting to updates WebSocket");

        let (ws_stream, _) = timeout(TIMEOUT, connect_async(ws_url.as_str()))
            .await
            .map_err(|_| Error::DialTimeout)??;
        info!("WebSocket connected");

        Ok(Stream::new_with_capacity(ws_stream, channel_capacity))
    }
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    use reqwest::StatusCode;
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}
