use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{CancelRequest, ConfirmRequest, GatewayError, GatewayPayment, PaymentGateway};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmBody<'a> {
    payment_key: &'a str,
    order_id: &'a str,
    amount: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelBody<'a> {
    cancel_reason: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cancel_amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentResponse {
    payment_key: String,
    order_id: String,
    status: String,
    total_amount: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the payment gateway's REST API.
///
/// Authenticates with the merchant secret key (HTTP basic, empty password).
/// Every call is bounded by the configured timeout; a timeout is reported as
/// [`GatewayError::Unavailable`] and never as a rejection.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpGateway {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<GatewayPayment, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .basic_auth(&self.secret_key, Some(""))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Unavailable(format!("request timed out: {}", e))
                } else {
                    GatewayError::Unavailable(format!("request failed: {}", e))
                }
            })?;

        parse_payment_response(response).await
    }
}

async fn parse_payment_response(response: Response) -> Result<GatewayPayment, GatewayError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| GatewayError::Unavailable(format!("failed to read response: {}", e)))?;

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(GatewayError::Unavailable(format!("gateway returned {}", status)));
    }

    if !status.is_success() {
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        return Err(GatewayError::Rejected {
            code: body.code.unwrap_or_else(|| status.as_str().to_string()),
            message: body
                .message
                .unwrap_or_else(|| format!("gateway returned {}", status)),
        });
    }

    let raw: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| GatewayError::Unavailable(format!("invalid gateway response: {}", e)))?;
    let payment: PaymentResponse = serde_json::from_value(raw.clone())
        .map_err(|e| GatewayError::Unavailable(format!("invalid gateway response: {}", e)))?;

    Ok(GatewayPayment {
        gateway_reference: payment.payment_key,
        order_id: payment.order_id,
        status: payment.status,
        total_amount: payment.total_amount,
        raw,
    })
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn confirm(&self, request: ConfirmRequest<'_>) -> Result<GatewayPayment, GatewayError> {
        self.post(
            "/v1/payments/confirm",
            &ConfirmBody {
                payment_key: request.gateway_reference,
                order_id: request.order_id,
                amount: request.amount,
            },
        )
        .await
    }

    async fn cancel(&self, request: CancelRequest<'_>) -> Result<GatewayPayment, GatewayError> {
        self.post(
            &format!("/v1/payments/{}/cancel", request.gateway_reference),
            &CancelBody {
                cancel_reason: request.reason,
                cancel_amount: request.amount,
            },
        )
        .await
    }
}
