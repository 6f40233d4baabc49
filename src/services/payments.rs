use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use crate::errors::ServiceError;

/// Result of starting a payment session with the external provider.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PaymentRedirect {
    /// URL the customer must be sent to in order to complete payment.
    pub redirect_url: String,
}

/// Seam for the external payment provider. Implementations must not mutate
/// order state; confirmation only ever arrives through the webhook.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate(
        &self,
        order_number: &str,
        amount: Decimal,
        currency: &str,
        customer_email: &str,
    ) -> Result<PaymentRedirect, ServiceError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest<'a> {
    order_reference: &'a str,
    amount: Decimal,
    currency: &'a str,
    customer_email: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateResponse {
    success: bool,
    redirect_url: Option<String>,
    message: Option<String>,
}

/// HTTP adapter for the hosted-checkout style provider. Network failures are
/// retryable; a provider rejection carries the provider's message verbatim.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn initiate_url(&self) -> String {
        format!("{}/payments/initiate", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, amount), fields(order_number))]
    async fn initiate(
        &self,
        order_number: &str,
        amount: Decimal,
        currency: &str,
        customer_email: &str,
    ) -> Result<PaymentRedirect, ServiceError> {
        let body = InitiateRequest {
            order_reference: order_number,
            amount,
            currency,
            customer_email,
        };

        let response = self
            .client
            .post(self.initiate_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Payment gateway unreachable");
                ServiceError::PaymentInitiationFailed(format!(
                    "Payment provider unreachable: {}",
                    e
                ))
            })?;

        let status = response.status();
        let parsed: InitiateResponse = response.json().await.map_err(|e| {
            warn!(error = %e, http_status = %status, "Unparseable payment gateway response");
            ServiceError::PaymentInitiationFailed(
                "Payment provider returned an invalid response".to_string(),
            )
        })?;

        if !parsed.success {
            let message = parsed
                .message
                .unwrap_or_else(|| "Payment was rejected by the provider".to_string());
            warn!(order_number, message = %message, "Payment initiation rejected");
            return Err(ServiceError::PaymentInitiationFailed(message));
        }

        let redirect_url = parsed.redirect_url.ok_or_else(|| {
            ServiceError::PaymentInitiationFailed(
                "Payment provider did not return a redirect URL".to_string(),
            )
        })?;

        info!(order_number, "Payment session initiated");
        Ok(PaymentRedirect { redirect_url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn successful_initiation_returns_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments/initiate"))
            .and(body_partial_json(serde_json::json!({
                "orderReference": "ORD-20260829-000001",
                "customerEmail": "jo@example.com"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "redirectUrl": "https://pay.example.com/session/abc"
            })))
            .mount(&server)
            .await;

        let gateway = HttpPaymentGateway::new(server.uri());
        let redirect = gateway
            .initiate("ORD-20260829-000001", dec!(20.00), "USD", "jo@example.com")
            .await
            .unwrap();

        assert_eq!(redirect.redirect_url, "https://pay.example.com/session/abc");
    }

    #[tokio::test]
    async fn provider_rejection_surfaces_its_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments/initiate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "message": "currency not supported"
            })))
            .mount(&server)
            .await;

        let gateway = HttpPaymentGateway::new(server.uri());
        let err = gateway
            .initiate("ORD-20260829-000002", dec!(5.00), "XYZ", "jo@example.com")
            .await
            .unwrap_err();

        match err {
            ServiceError::PaymentInitiationFailed(msg) => {
                assert_eq!(msg, "currency not supported");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_provider_is_a_retryable_failure() {
        // Port 9 is discard; nothing is listening in the test environment.
        let gateway = HttpPaymentGateway::new("http://127.0.0.1:9");
        let err = gateway
            .initiate("ORD-20260829-000003", dec!(1.00), "USD", "jo@example.com")
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::PaymentInitiationFailed(_)));
    }
}
