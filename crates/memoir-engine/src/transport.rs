use std::sync::Arc;

use memoir_contracts::events::EventWriter;
use serde_json::json;

use crate::error::TransportError;
use crate::http::{HttpExchange, HttpRequest, HttpResponse};
use crate::retry::{run_with_backoff, Attempt, RetryPolicy, Sleeper, ThreadSleeper};
use crate::trace;

/// Wraps one exchange with a per-attempt timeout and linear-backoff retry.
///
/// Retried: network failures (reset, timeout, DNS) and HTTP 408/429/5xx.
/// Anything else is returned after the first attempt. A non-2xx response
/// that is not retried comes back as `TransportErrorKind::Status`.
#[derive(Clone)]
pub struct ResilientTransport {
    exchange: Arc<dyn HttpExchange>,
    sleeper: Arc<dyn Sleeper>,
}

impl ResilientTransport {
    pub fn new(exchange: Arc<dyn HttpExchange>) -> Self {
        Self::with_sleeper(exchange, Arc::new(ThreadSleeper))
    }

    pub fn with_sleeper(exchange: Arc<dyn HttpExchange>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { exchange, sleeper }
    }

    pub fn exchange_name(&self) -> &str {
        self.exchange.name()
    }

    pub fn attempt(
        &self,
        request: &HttpRequest,
        policy: &RetryPolicy,
        events: &EventWriter,
    ) -> Result<HttpResponse, TransportError> {
        let exchange = self.exchange.name().to_string();
        let max_attempts = policy.max_attempts.max(1);
        let result = run_with_backoff(
            policy,
            self.sleeper.as_ref(),
            |attempt| {
                trace(
                    events,
                    "fetch_attempt",
                    json!({
                        "exchange": exchange,
                        "method": request.method.as_str(),
                        "url": request.url,
                        "attempt": attempt + 1,
                        "max_attempts": max_attempts,
                    }),
                );
                match self.exchange.execute(request, policy.timeout) {
                    Ok(response) if response.is_success() => Attempt::Done(response),
                    Ok(response) => {
                        let err =
                            TransportError::status(response.status, &request.url, &response.text());
                        if err.is_retryable() {
                            Attempt::Retry(err)
                        } else {
                            Attempt::Fail(err)
                        }
                    }
                    Err(err) if err.is_retryable() => Attempt::Retry(err),
                    Err(err) => Attempt::Fail(err),
                }
            },
            |attempt, err, delay| {
                trace(
                    events,
                    "fetch_retry",
                    json!({
                        "exchange": exchange,
                        "url": request.url,
                        "attempt": attempt + 1,
                        "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "status": err.status_code(),
                        "error": err.message,
                    }),
                );
            },
        );
        if let Err(err) = &result {
            trace(
                events,
                "fetch_failed",
                json!({
                    "exchange": exchange,
                    "url": request.url,
                    "status": err.status_code(),
                    "error": err.message,
                }),
            );
        }
        result
    }
}
