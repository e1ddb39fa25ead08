use axum::{
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing fast
    HalfOpen, // Probing
}

/// Trips after `failure_threshold` consecutive 5xx responses and fails fast
/// until `reset_timeout` has elapsed.
pub struct CircuitBreaker {
    pub name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    failure_threshold: usize,
    reset_timeout: Duration,
    last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold,
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> CircuitState {
        *self.state.read().await
    }

    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last_fail = *self.last_failure.read().await;
                match last_fail {
                    Some(instant) if instant.elapsed() > self.reset_timeout => {
                        *self.state.write().await = CircuitState::HalfOpen;
                        tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        }
        self.failure_count.store(0, Ordering::SeqCst);
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.last_failure.write().await = Some(Instant::now());
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
    }
}

/// One breaker per upstream the customer routes depend on.
pub struct Resiliency {
    pub payment_cb: CircuitBreaker,
    pub inventory_cb: CircuitBreaker,
}

impl Default for Resiliency {
    fn default() -> Self {
        Self {
            payment_cb: CircuitBreaker::new("payment processor", 5, Duration::from_secs(30)),
            inventory_cb: CircuitBreaker::new("inventory provider", 5, Duration::from_secs(30)),
        }
    }
}

pub async fn circuit_breaker_middleware(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> impl IntoResponse {
    let path = req.uri().path();
    let cb = if path.ends_with("/payment-intent") {
        Some(&state.resiliency.payment_cb)
    } else if path.ends_with("/search") || path.ends_with("/cancel") {
        Some(&state.resiliency.inventory_cb)
    } else {
        None
    };

    let Some(cb) = cb else {
        return next.run(req).await.into_response();
    };

    if !cb.check().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": format!("The {} is temporarily unavailable. Please try again shortly.", cb.name)
            })),
        )
            .into_response();
    }

    let response = next.run(req).await;

    if response.status().is_server_error() {
        cb.record_failure().await;
    } else {
        cb.record_success().await;
    }

    response.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_breaker_opens_after_threshold_and_recovers() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(20));
        cb.record_failure().await;
        assert!(cb.check().await);
        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Open);
        assert!(!cb.check().await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.check().await);
        assert_eq!(cb.current().await, CircuitState::HalfOpen);
        cb.record_success().await;
        assert_eq!(cb.current().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cb.check().await);
        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Open);
    }
}
