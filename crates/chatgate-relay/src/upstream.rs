use std::sync::OnceLock;

use http::StatusCode;
use serde::Deserialize;

use chatgate_protocol::GatewayError;

static CLIENT: OnceLock<wreq::Client> = OnceLock::new();

pub(crate) fn shared_client() -> &'static wreq::Client {
    CLIENT.get_or_init(wreq::Client::new)
}

#[derive(Deserialize)]
struct QuotaBody {
    limit: Option<u32>,
    current: Option<u32>,
    tier: Option<String>,
}

/// Translates an upstream HTTP failure to a typed error before any bytes
/// of the body are parsed as events.
pub(crate) fn classify_status(status: StatusCode, body: &[u8]) -> GatewayError {
    match status {
        StatusCode::UNAUTHORIZED => GatewayError::AuthExpired,
        StatusCode::TOO_MANY_REQUESTS => match serde_json::from_slice::<QuotaBody>(body) {
            Ok(QuotaBody { limit: Some(limit), current: Some(current), tier }) => {
                GatewayError::QuotaExceeded {
                    limit,
                    current,
                    tier: tier.unwrap_or_else(|| "unknown".to_string()),
                }
            }
            _ => GatewayError::RateLimited("upstream rate limit".to_string()),
        },
        status => GatewayError::UpstreamHttp { status: status.as_u16() },
    }
}
