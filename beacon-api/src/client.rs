//! HTTP client for the account backend.
//!
//! Handles the cookie session, bearer token injection, timeouts, and the
//! request/response lifecycle for the realtime ticket endpoint.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use beacon_core::config::AppConfig;
use beacon_core::error::{BeaconError, BeaconResult};

use crate::ticket::Ticket;
use crate::token::TokenStore;

/// HTTP client for communicating with the account backend.
///
/// Wraps reqwest::Client with a cookie jar (seeded from the configured
/// session cookie, if any) and attaches the cached bearer token to every
/// request. Either credential may be the valid one depending on how the
/// client was signed in, so both are always sent.
#[derive(Clone)]
pub struct ApiClient {
    inner: Client,
    /// Origin of the account API (e.g. "https://app.example.com").
    api_base: String,
    /// Absolute URL of the realtime ticket endpoint.
    ticket_url: String,
    /// Default request timeout.
    timeout: Duration,
    /// Cached bearer token.
    tokens: Arc<dyn TokenStore>,
}

impl ApiClient {
    /// Create a new ApiClient from application configuration.
    pub fn new(config: &AppConfig, tokens: Arc<dyn TokenStore>) -> BeaconResult<Self> {
        let api_base = AppConfig::sanitize_api_base(&config.server.api_base);
        let ticket_url = config.ticket_url()?;
        let timeout = Duration::from_millis(config.server.api_timeout_ms);

        let jar = Jar::default();
        if let Some(cookie) = config.server.session_cookie.as_deref() {
            let origin = reqwest::Url::parse(&api_base)
                .map_err(|e| BeaconError::InvalidUrl(format!("{api_base}: {e}")))?;
            for part in cookie.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                jar.add_cookie_str(part, &origin);
            }
        }

        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .pool_idle_timeout(Duration::from_secs(90))
            .cookie_provider(Arc::new(jar));

        if config.server.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let inner = builder
            .build()
            .map_err(|e| BeaconError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            api_base,
            ticket_url,
            timeout,
            tokens,
        })
    }

    /// Get the account API origin.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Get the ticket endpoint URL.
    pub fn ticket_url(&self) -> &str {
        &self.ticket_url
    }

    /// Attach the cached bearer token, if any.
    fn apply_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.tokens.get() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Execute a single request without retry.
    async fn send(&self, method: Method, url: &str) -> BeaconResult<Response> {
        debug!("{} {}", method, url);
        let builder = self.inner.request(method, url).timeout(self.timeout);
        let response = self
            .apply_auth(builder)
            .send()
            .await
            .map_err(Self::classify_error)?;
        Self::check_status(response).await
    }

    /// Request a one-time realtime ticket.
    ///
    /// Performs exactly one POST. Any non-success status, a body that is not
    /// a JSON object, or a missing or empty `ticket` field is an error.
    pub async fn request_ticket(&self) -> BeaconResult<Ticket> {
        let response = self.send(Method::POST, &self.ticket_url).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BeaconError::Serialization(format!("failed to parse ticket response: {e}")))?;

        match body.as_object().and_then(|o| o.get("ticket")).and_then(|t| t.as_str()) {
            Some(t) if !t.trim().is_empty() => Ok(Ticket::new(t)),
            _ => Err(BeaconError::AuthFailed("ticket response did not carry a ticket".into())),
        }
    }

    /// Check the HTTP status code and convert to BeaconError if needed.
    async fn check_status(response: Response) -> BeaconResult<Response> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BeaconError::AuthFailed(format!("server returned {status}")));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BeaconError::ServerError {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(response)
    }

    /// Classify a reqwest error into a BeaconError variant.
    fn classify_error(e: reqwest::Error) -> BeaconError {
        if e.is_timeout() {
            BeaconError::Timeout(e.to_string())
        } else if e.is_connect() {
            BeaconError::Http(format!("connection failed: {e}"))
        } else {
            BeaconError::Http(e.to_string())
        }
    }
}
