use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use crate::{errors::ServiceError, services::order_state::ConfirmationOutcome, AppState};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TOLERANCE_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload {
    /// Order number the payment session was opened for.
    order_reference: String,
    /// Provider-side transaction reference.
    provider_reference: String,
    amount: Decimal,
    #[serde(default)]
    event_type: Option<String>,
}

/// POST /api/v1/payments/webhook
///
/// Replay-safe: the underlying flip to `paid` is a compare-and-set, so the
/// same confirmation delivered twice returns 200 both times and charges
/// nothing twice.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Invalid payload", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.clone() {
        let tolerance = state
            .config
            .payment_webhook_tolerance_secs
            .unwrap_or(DEFAULT_TOLERANCE_SECS);
        if !verify_signature(&headers, &body, &secret, tolerance) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    if let Some(event_type) = payload.event_type.as_deref() {
        if !matches!(event_type, "payment.succeeded" | "charge.succeeded") {
            info!(event_type, "Ignoring payment webhook event type");
            return Ok((StatusCode::OK, "ok"));
        }
    }

    let outcome = state
        .services
        .state_machine
        .confirm_payment(
            &payload.order_reference,
            &payload.provider_reference,
            payload.amount,
        )
        .await?;

    match outcome {
        ConfirmationOutcome::Confirmed => {
            info!(order_reference = %payload.order_reference, "Payment webhook processed");
        }
        ConfirmationOutcome::AlreadyPaid => {
            info!(order_reference = %payload.order_reference, "Payment webhook replay ignored");
        }
        ConfirmationOutcome::RejectedCancelled => {
            warn!(
                order_reference = %payload.order_reference,
                "Payment webhook for cancelled order, flagged for refund"
            );
        }
    }

    Ok((StatusCode::OK, "ok"))
}

fn verify_signature(headers: &HeaderMap, payload: &Bytes, secret: &str, tolerance_secs: u64) -> bool {
    // Generic HMAC: x-timestamp and x-signature headers.
    if let (Some(ts), Some(sig)) = (headers.get("x-timestamp"), headers.get("x-signature")) {
        if let (Ok(ts), Ok(sig)) = (ts.to_str(), sig.to_str()) {
            if let Ok(ts_i) = ts.parse::<i64>() {
                let now = chrono::Utc::now().timestamp();
                if (now - ts_i).unsigned_abs() > tolerance_secs {
                    return false;
                }
            }
            return check_hmac(ts, payload, secret, sig);
        }
    }

    // Stripe-style header: t=<ts>,v1=<hex>.
    if let Some(sig) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) {
        let mut ts = "";
        let mut v1 = "";
        for part in sig.split(',') {
            let mut it = part.split('=');
            match (it.next(), it.next()) {
                (Some("t"), Some(val)) => ts = val,
                (Some("v1"), Some(val)) => v1 = val,
                _ => {}
            }
        }
        if !ts.is_empty() && !v1.is_empty() {
            return check_hmac(ts, payload, secret, v1);
        }
    }

    false
}

fn check_hmac(ts: &str, payload: &Bytes, secret: &str, provided: &str) -> bool {
    let signed = format!("{}.{}", ts, std::str::from_utf8(payload).unwrap_or(""));
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(signed.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, provided)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
