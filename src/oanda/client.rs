//! HTTP client for the OANDA v20 API
//!
//! Bearer-token authenticated REST calls against the practice or live host,
//! wrapped in a rate limiter and a circuit breaker. Read and cancel calls
//! retry with exponential backoff; order placement gets exactly one attempt,
//! because a lost response cannot be told apart from a lost request and
//! re-POSTing could double an order. The next reconciliation cycle picks up
//! whatever actually happened.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::types::{
    AccountSummaryResponse, CreateOrderBody, CreateOrderResponse, OpenPositionsResponse,
    OrdersResponse, PricingResponse,
};
use crate::common::{BreakerState, CircuitBreaker, RateLimiter};
use crate::config::{Config, Environment};
use crate::gateway::{FeedUnavailable, GatewayError, OrderGateway, PriceFeed};
use crate::types::{AccountSnapshot, OpenOrder, OpenPosition, OrderRequest, PriceTick};

/// Client tuning knobs.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Retry attempts for idempotent calls (placement never retries).
    pub max_retries: u32,
    pub timeout: Duration,
    pub requests_per_second: usize,
    /// Consecutive failures before the circuit opens.
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(10),
            requests_per_second: 10,
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_second: usize) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }
}

/// OANDA v20 REST client implementing both gateway seams.
#[derive(Clone)]
pub struct OandaClient {
    account_id: String,
    access_token: String,
    base_url: &'static str,
    http: Client,
    breaker: Arc<Mutex<CircuitBreaker>>,
    limiter: RateLimiter,
    max_retries: u32,
}

impl OandaClient {
    pub fn new(
        account_id: impl Into<String>,
        access_token: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self::with_config(account_id, access_token, environment, ClientConfig::default())
    }

    pub fn with_config(
        account_id: impl Into<String>,
        access_token: impl Into<String>,
        environment: Environment,
        config: ClientConfig,
    ) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build HTTP client");

        Self {
            account_id: account_id.into(),
            access_token: access_token.into(),
            base_url: environment.api_base_url(),
            http,
            breaker: Arc::new(Mutex::new(CircuitBreaker::new(
                config.breaker_failure_threshold,
                2,
                config.breaker_cooldown,
            ))),
            limiter: RateLimiter::new(config.requests_per_second),
            max_retries: config.max_retries,
        }
    }

    /// Build from a validated [`Config`], taking its credentials, environment,
    /// and request timeout.
    pub fn from_config(config: &Config) -> Self {
        let client_config = ClientConfig::default()
            .with_timeout(Duration::from_secs(config.monitoring.request_timeout_seconds));
        Self::with_config(
            config.account.account_id.clone().unwrap_or_default(),
            config.account.access_token.clone().unwrap_or_default(),
            config.account.environment,
            client_config,
        )
    }

    pub async fn breaker_state(&self) -> BreakerState {
        self.breaker.lock().await.state()
    }

    /// Run an operation through the breaker, the rate limiter, and up to
    /// `retries` backed-off re-attempts. Auth rejections are never retried.
    async fn execute<F, Fut, T>(&self, retries: u32, operation: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        {
            let mut breaker = self.breaker.lock().await;
            if !breaker.can_attempt() {
                return Err(GatewayError::CircuitOpen);
            }
        }

        self.limiter.acquire().await;

        let mut last_error = None;
        for attempt in 0..=retries {
            if attempt > 0 {
                let delay = Duration::from_secs(2u64.pow(attempt - 1));
                debug!("retrying after {}ms", delay.as_millis());
                sleep(delay).await;
            }

            match operation().await {
                Ok(result) => {
                    self.breaker.lock().await.record_success();
                    return Ok(result);
                }
                Err(err) if err.is_fatal() => {
                    self.breaker.lock().await.record_failure();
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        "request failed (attempt {}/{}): {err}",
                        attempt + 1,
                        retries + 1
                    );
                    last_error = Some(err);
                }
            }
        }

        self.breaker.lock().await.record_failure();
        Err(last_error
            .unwrap_or_else(|| GatewayError::Network("request failed after retries".to_string())))
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, GatewayError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .header("AcceptDatetimeFormat", "RFC3339")
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, GatewayError>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("AcceptDatetimeFormat", "RFC3339")
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn put_json<T>(&self, path: &str) -> Result<T, GatewayError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.access_token)
            .header("AcceptDatetimeFormat", "RFC3339")
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T>(response: reqwest::Response) -> Result<T, GatewayError>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::Api {
                code: status.as_u16(),
                message: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| GatewayError::Parse(e.to_string()))
    }
}

#[async_trait]
impl PriceFeed for OandaClient {
    async fn get_price(&self, instrument: &str) -> Result<PriceTick, FeedUnavailable> {
        let path = format!(
            "/v3/accounts/{}/pricing?instruments={}",
            self.account_id, instrument
        );
        let response: PricingResponse = self
            .execute(self.max_retries, || {
                let this = self.clone();
                let path = path.clone();
                async move { this.get_json(&path).await }
            })
            .await
            .map_err(|e| FeedUnavailable::new(e.to_string()))?;

        response
            .prices
            .first()
            .and_then(|p| p.to_tick())
            .ok_or_else(|| FeedUnavailable::new(format!("no quote for {instrument}")))
    }
}

#[async_trait]
impl OrderGateway for OandaClient {
    async fn place_order(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        let path = format!("/v3/accounts/{}/orders", self.account_id);
        let body = CreateOrderBody::limit_gtc(request);

        // Single attempt: see the module docs on double-placement.
        let response: CreateOrderResponse = self
            .execute(0, || {
                let this = self.clone();
                let path = path.clone();
                let body = body.clone();
                async move { this.post_json(&path, &body).await }
            })
            .await?;

        response
            .order_id()
            .ok_or_else(|| GatewayError::Parse("order response carried no transaction".to_string()))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let path = format!(
            "/v3/accounts/{}/orders/{}/cancel",
            self.account_id, order_id
        );
        let _: serde_json::Value = self
            .execute(self.max_retries, || {
                let this = self.clone();
                let path = path.clone();
                async move { this.put_json(&path).await }
            })
            .await?;
        Ok(())
    }

    async fn list_open_orders(&self, instrument: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        // The v20 default state filter is PENDING, which is exactly the
        // resting set the ledger reconciles against.
        let path = format!(
            "/v3/accounts/{}/orders?instrument={}&count=500",
            self.account_id, instrument
        );
        let response: OrdersResponse = self
            .execute(self.max_retries, || {
                let this = self.clone();
                let path = path.clone();
                async move { this.get_json(&path).await }
            })
            .await?;

        Ok(response
            .orders
            .iter()
            .filter_map(|o| o.to_open_order())
            .collect())
    }

    async fn list_open_positions(
        &self,
        instrument: &str,
    ) -> Result<Vec<OpenPosition>, GatewayError> {
        let path = format!("/v3/accounts/{}/openPositions", self.account_id);
        let response: OpenPositionsResponse = self
            .execute(self.max_retries, || {
                let this = self.clone();
                let path = path.clone();
                async move { this.get_json(&path).await }
            })
            .await?;

        Ok(response
            .positions
            .iter()
            .filter(|p| p.instrument == instrument)
            .flat_map(|p| p.to_open_positions())
            .collect())
    }

    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, GatewayError> {
        let path = format!("/v3/accounts/{}/summary", self.account_id);
        let response: AccountSummaryResponse = self
            .execute(self.max_retries, || {
                let this = self.clone();
                let path = path.clone();
                async move { this.get_json(&path).await }
            })
            .await?;
        Ok(response.account.to_snapshot())
    }
}
