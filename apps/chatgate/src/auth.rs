use async_trait::async_trait;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use chatgate_core::{AuthClient, Credential};
use chatgate_protocol::GatewayError;

/// Refreshes credentials against the external session provider.
pub struct HttpAuthClient {
    url: String,
    client: wreq::Client,
}

#[derive(Deserialize)]
struct RefreshResponse {
    token: String,
    expires_in: i64,
}

impl HttpAuthClient {
    pub fn new(url: String) -> Self {
        Self { url, client: wreq::Client::new() }
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn refresh(&self) -> Result<Credential, GatewayError> {
        let response = self
            .client
            .post(&self.url)
            .send()
            .await
            .map_err(|err| GatewayError::UpstreamUnavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::AuthExpired);
        }
        let payload = response
            .json::<RefreshResponse>()
            .await
            .map_err(|err| GatewayError::UpstreamUnavailable(err.to_string()))?;
        Ok(Credential {
            token: payload.token,
            expires_at: OffsetDateTime::now_utc() + Duration::seconds(payload.expires_in),
        })
    }
}

/// Stand-in for deployments without a session provider: every request
/// proceeds anonymously on the public key.
pub struct AnonymousOnly;

#[async_trait]
impl AuthClient for AnonymousOnly {
    async fn refresh(&self) -> Result<Credential, GatewayError> {
        Err(GatewayError::AuthExpired)
    }
}
