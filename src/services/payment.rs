//! payment.rs
//!
//! Исходящий клиент к внешнему платёжному провайдеру: создание checkout-сессии для
//! CreateHold (§4.D шаг 5) и проверка её статуса. Все сетевые вызовы защищены
//! Circuit Breaker'ом — тем же паттерном, что уже стоял перед прежним шлюзом
//! этого сервиса, просто переключённым на checkout-сессии вместо amount/token API.
//!
//! Верификация входящего вебхука (подпись, разбор события) живёт в
//! `controllers::webhook`, а не здесь — этот модуль знает только про исходящий API.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PaymentConfig;
use crate::error::PaymentGatewayError;

/// Состояния Circuit Breaker: Closed (нормальная работа), Open (блокируем запросы после
/// серии сбоев), HalfOpen (один пробный запрос после таймаута).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    opened_at: AtomicU64,
    failure_threshold: u32,
    timeout: Duration,
    started: Instant,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            failure_threshold,
            timeout: Duration::from_secs(timeout_seconds),
            started: Instant::now(),
        }
    }

    fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    pub fn can_execute(&self) -> bool {
        let state = *self.state.read().unwrap();
        match state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let opened_at = self.opened_at.load(Ordering::Relaxed);
                if self.elapsed_secs().saturating_sub(opened_at) >= self.timeout.as_secs() {
                    *self.state.write().unwrap() = CircuitState::HalfOpen;
                    info!("payment gateway circuit breaker half-open, allowing a trial request");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::HalfOpen => {
                *state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::Relaxed);
                info!("payment gateway circuit breaker closed");
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Relaxed);
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.write().unwrap();
        match *state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                *state = CircuitState::Open;
                self.opened_at.store(self.elapsed_secs(), Ordering::Relaxed);
                error!(failures, threshold = self.failure_threshold, "payment gateway circuit breaker opened");
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                self.opened_at.store(self.elapsed_secs(), Ordering::Relaxed);
                warn!("payment gateway trial request failed, circuit breaker re-opened");
            }
            _ => {}
        }
    }

    pub fn status(&self) -> (CircuitState, u32) {
        (*self.state.read().unwrap(), self.failure_count.load(Ordering::Relaxed))
    }
}

#[derive(Debug, Serialize)]
struct CheckoutSessionRequest {
    amount: i64,
    currency: String,
    #[serde(rename = "clientReferenceId")]
    client_reference_id: String,
    #[serde(rename = "successUrl")]
    success_url: String,
    #[serde(rename = "cancelUrl")]
    cancel_url: String,
}

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

/// Checkout-сессия, привязанная к резервации — `session_id` это то, что уходит в
/// `Hold.paymentSessionId`, а `checkout_url` — то, куда редиректим клиента.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub session_id: String,
    pub checkout_url: Option<String>,
}

#[derive(Clone)]
pub struct PaymentGatewayClient {
    base_url: String,
    success_url: String,
    cancel_url: String,
    http: reqwest::Client,
    circuit_breaker: std::sync::Arc<CircuitBreaker>,
}

impl PaymentGatewayClient {
    pub fn from_config(config: &PaymentConfig) -> Self {
        Self {
            base_url: config.gateway_url.clone(),
            success_url: format!("{}/payments/success", config.gateway_url),
            cancel_url: format!("{}/payments/fail", config.gateway_url),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client builds with a fixed timeout"),
            circuit_breaker: std::sync::Arc::new(CircuitBreaker::new(5, 60)),
        }
    }

    async fn execute<F, T>(&self, operation: F) -> Result<T, PaymentGatewayError>
    where
        F: std::future::Future<Output = Result<T, reqwest::Error>>,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("payment gateway circuit breaker open, rejecting request without calling out");
            return Err(PaymentGatewayError::CircuitOpen);
        }
        match operation.await {
            Ok(v) => {
                self.circuit_breaker.record_success();
                Ok(v)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                Err(PaymentGatewayError::Request(e))
            }
        }
    }

    /// §4.D шаг 5 — создаёт checkout-сессию, привязанную к reservationId. Провайдер считает
    /// суммы в минорных единицах, поэтому `Decimal` масштабируется на 100 перед отправкой.
    pub async fn create_checkout_session(
        &self,
        reservation_id: Uuid,
        total_price: Decimal,
    ) -> Result<CheckoutSession, PaymentGatewayError> {
        let amount_minor = (total_price * Decimal::from(100))
            .round()
            .to_i64()
            .unwrap_or(0);

        let request = CheckoutSessionRequest {
            amount: amount_minor,
            currency: "usd".to_string(),
            client_reference_id: reservation_id.to_string(),
            success_url: self.success_url.clone(),
            cancel_url: self.cancel_url.clone(),
        };

        info!(reservation_id = %reservation_id, amount_minor, "creating payment checkout session");

        let url = format!("{}/v1/checkout/sessions", self.base_url);
        let response = self
            .execute(async {
                self.http
                    .post(&url)
                    .json(&request)
                    .send()
                    .await?
                    .json::<CheckoutSessionResponse>()
                    .await
            })
            .await?;

        Ok(CheckoutSession { session_id: response.id, checkout_url: response.url })
    }

    pub fn circuit_breaker_status(&self) -> (CircuitState, u32) {
        self.circuit_breaker.status()
    }
}
