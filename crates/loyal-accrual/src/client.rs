use std::time::Duration;

use loyal_schemas::{OrderNumber, Points};
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use tracing::debug;

use crate::{AccrualGateway, GatewayError, Verdict};

/// Retry hints above this are clamped.
pub const MAX_RETRY_HINT: Duration = Duration::from_secs(3600);

/// reqwest-backed gateway: `GET {base}/api/orders/{number}`.
#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(base_url: String, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    fn order_url(&self, number: &OrderNumber) -> String {
        format!(
            "{}/api/orders/{}",
            self.base_url.trim_end_matches('/'),
            number.as_str()
        )
    }
}

#[async_trait::async_trait]
impl AccrualGateway for HttpAccrualClient {
    async fn fetch_verdict(&self, number: &OrderNumber) -> Result<Verdict, GatewayError> {
        let resp = self
            .http
            .get(self.order_url(number))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = resp
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        debug!(order = %number, status, "accrual response");
        classify_response(number, status, retry_after.as_deref(), &body)
    }
}

#[derive(Debug, Deserialize)]
struct AccrualBody {
    order: String,
    status: String,
    #[serde(default)]
    accrual: Option<f64>,
}

/// Map one authority response onto a verdict or a classified failure.
pub fn classify_response(
    number: &OrderNumber,
    status: u16,
    retry_after: Option<&str>,
    body: &[u8],
) -> Result<Verdict, GatewayError> {
    match status {
        200 => {}
        204 => return Err(GatewayError::NotRegistered),
        429 => {
            return Err(GatewayError::RateLimited {
                retry_after: parse_retry_hint(retry_after, body),
            })
        }
        500..=599 => return Err(GatewayError::Server { status }),
        400..=499 => return Err(GatewayError::Rejected { status }),
        _ => return Err(GatewayError::Unexpected { status }),
    }

    let parsed: AccrualBody =
        serde_json::from_slice(body).map_err(|_| GatewayError::Unexpected { status })?;

    if parsed.order != number.as_str() {
        return Err(GatewayError::Protocol(format!(
            "response is for order {} not {}",
            parsed.order, number
        )));
    }

    match parsed.status.as_str() {
        "REGISTERED" | "PROCESSING" => Ok(Verdict::Processing),
        "INVALID" => Ok(Verdict::Invalid),
        "PROCESSED" => {
            let raw = parsed.accrual.ok_or_else(|| {
                GatewayError::Protocol("PROCESSED verdict without accrual".to_string())
            })?;
            let amount = Points::from_f64(raw).map_err(|e| {
                GatewayError::Protocol(format!("PROCESSED verdict with bad accrual {raw}: {e}"))
            })?;
            Ok(Verdict::Processed(amount))
        }
        other => Err(GatewayError::Protocol(format!(
            "unknown authority status {other}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct RetryBody {
    retry_after: f64,
}

/// `Retry-After` in delta-seconds, else a JSON body `{"retry_after": N}`.
/// HTTP-date values are not supported and yield `None`.
pub fn parse_retry_hint(header: Option<&str>, body: &[u8]) -> Option<Duration> {
    let secs = header
        .and_then(|h| h.trim().parse::<u64>().ok())
        .map(|s| s as f64)
        .or_else(|| {
            serde_json::from_slice::<RetryBody>(body)
                .ok()
                .map(|b| b.retry_after)
        })?;

    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(secs.min(MAX_RETRY_HINT.as_secs_f64())))
}
