//! webhook.rs
//!
//! Payment Webhook Adapter (§4.H). Verifies the provider's signed callback and, only for
//! `checkout.session.completed`, resolves the reservation by its payment session id and
//! invokes `Coordinator::confirm`. Grounded in the original `/stripe/webhook` handler: cap
//! the raw body, check the signature before touching JSON, and reply 204/200/500 so the
//! provider's retry behaviour lines up with our idempotency story.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::services::payment::CircuitState;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stripe/webhook", post(stripe_webhook))
        .route("/payments/circuit-breaker-status", get(circuit_breaker_status))
}

/// Signature tolerance: a replayed webhook older than this is rejected even with a valid
/// HMAC, the same window Stripe's own SDK defaults to.
const SIGNATURE_TOLERANCE_SECONDS: i64 = 300;

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
}

async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if body.len() > state.config.payment.webhook_max_body_bytes {
        warn!(len = body.len(), "rejected webhook body over the size cap");
        return StatusCode::BAD_REQUEST;
    }

    let signature = match headers.get("stripe-signature").and_then(|v| v.to_str().ok()) {
        Some(s) => s,
        None => return StatusCode::BAD_REQUEST,
    };

    if let Err(e) = verify_webhook_signature(
        &body,
        signature,
        state.config.payment.webhook_signing_secret.as_bytes(),
        SIGNATURE_TOLERANCE_SECONDS,
    ) {
        warn!(error = %e, "webhook signature verification failed");
        return StatusCode::BAD_REQUEST;
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "webhook body failed to parse as JSON after a valid signature");
            return StatusCode::BAD_REQUEST;
        }
    };

    if event.event_type != "checkout.session.completed" {
        return StatusCode::OK;
    }

    let session_id = event.data.object.id;
    let header = match state.coordinator.find_by_payment_session(&session_id).await {
        Ok(Some(h)) => h,
        Ok(None) => {
            warn!(session_id = %session_id, "webhook for unknown payment session, ignoring");
            return StatusCode::OK;
        }
        Err(e) => {
            warn!(error = %e, session_id = %session_id, "failed to look up reservation by payment session");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    match state.coordinator.confirm(header.id).await {
        Ok(()) => {
            info!(reservation_id = %header.id, "confirmed reservation from payment webhook");
            StatusCode::NO_CONTENT
        }
        Err(crate::error::CoordinatorError::BadState) => StatusCode::OK,
        Err(e) => {
            warn!(error = %e, reservation_id = %header.id, "failed to confirm reservation from webhook");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum SignatureError {
    #[error("missing timestamp in signature header")]
    MissingTimestamp,
    #[error("missing v1 signature in signature header")]
    MissingSignature,
    #[error("timestamp is not a valid integer")]
    BadTimestamp,
    #[error("signature is not valid hex")]
    BadHex,
    #[error("timestamp is outside the allowed tolerance")]
    Stale,
    #[error("signature does not match")]
    Mismatch,
}

/// Parses a `t=<unix seconds>,v1=<hex hmac>` header and verifies the HMAC-SHA256 of
/// `"{timestamp}.{payload}"` against the shared secret in constant time.
fn verify_webhook_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &[u8],
    tolerance_seconds: i64,
) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut v1: Option<&str> = None;
    for part in signature_header.split(',') {
        let mut kv = part.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(v)) => timestamp = Some(v),
            (Some("v1"), Some(v)) => v1 = Some(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MissingTimestamp)?;
    let v1 = v1.ok_or(SignatureError::MissingSignature)?;

    let timestamp_secs: i64 = timestamp.parse().map_err(|_| SignatureError::BadTimestamp)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_secs() as i64;
    if (now - timestamp_secs).abs() > tolerance_seconds {
        return Err(SignatureError::Stale);
    }

    let expected_hex = hex_decode(v1).ok_or(SignatureError::BadHex)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts keys of any length");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let computed = mac.finalize().into_bytes();

    if computed.as_slice().ct_eq(expected_hex.as_slice()).unwrap_u8() == 1 {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

async fn circuit_breaker_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (state, failures) = state.payment.circuit_breaker_status();
    let state_name = match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    };
    Json(serde_json::json!({ "state": state_name, "failureCount": failures }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_a_correctly_signed_payload() {
        let secret = b"whsec_test_secret";
        let payload = b"{\"type\":\"checkout.session.completed\"}";
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let sig = mac.finalize().into_bytes();
        let sig_hex: String = sig.iter().map(|b| format!("{:02x}", b)).collect();

        let header = format!("t={},v1={}", timestamp, sig_hex);
        assert!(verify_webhook_signature(payload, &header, secret, 300).is_ok());
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let secret = b"whsec_test_secret";
        let payload = b"{\"type\":\"checkout.session.completed\"}";
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(b"{\"type\":\"something.else\"}");
        let sig = mac.finalize().into_bytes();
        let sig_hex: String = sig.iter().map(|b| format!("{:02x}", b)).collect();

        let header = format!("t={},v1={}", timestamp, sig_hex);
        assert!(verify_webhook_signature(payload, &header, secret, 300).is_err());
    }

    #[test]
    fn rejects_a_stale_timestamp() {
        let secret = b"whsec_test_secret";
        let payload = b"{}";
        let timestamp = 0i64;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        let sig = mac.finalize().into_bytes();
        let sig_hex: String = sig.iter().map(|b| format!("{:02x}", b)).collect();

        let header = format!("t={},v1={}", timestamp, sig_hex);
        assert!(matches!(
            verify_webhook_signature(payload, &header, secret, 300),
            Err(SignatureError::Stale)
        ));
    }
}
