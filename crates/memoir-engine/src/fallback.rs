use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::{Context, Result};
use memoir_contracts::events::EventWriter;
use reqwest::blocking::Client as HttpClient;
use serde_json::json;

use crate::error::TransportError;
use crate::http::{send_buffered, HttpExchange, HttpRequest, HttpResponse};
use crate::retry::RetryPolicy;
use crate::trace;
use crate::transport::ResilientTransport;

/// Secondary exchange: IPv4 only, HTTP/1.1, no idle pooling, `Connection: close`.
///
/// Binding the local side to `0.0.0.0` makes the connector skip IPv6
/// candidates while name resolution stays on reqwest's own resolver.
///
/// Holds no per-call state, so one instance is shared by every request.
#[derive(Debug, Clone)]
pub struct Ipv4Exchange {
    http: HttpClient,
}

impl Ipv4Exchange {
    pub fn new() -> Result<Self> {
        let http = HttpClient::builder()
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .pool_max_idle_per_host(0)
            .http1_only()
            .build()
            .context("failed to build IPv4 fallback HTTP client")?;
        Ok(Self { http })
    }
}

impl HttpExchange for Ipv4Exchange {
    fn name(&self) -> &str {
        "ipv4-close"
    }

    fn execute(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        send_buffered(&self.http, request, timeout, true)
    }
}

#[derive(Clone)]
pub enum FallbackPolicy {
    Disabled,
    Enabled {
        transport: ResilientTransport,
        policy: RetryPolicy,
    },
}

impl FallbackPolicy {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

/// Primary transport plus the optional secondary route.
///
/// The secondary route runs only after the primary has exhausted its retries
/// on a network-classified failure. When it fails as well the primary error
/// is returned; the secondary error is only logged.
#[derive(Clone)]
pub struct FailoverTransport {
    primary: ResilientTransport,
    fallback: FallbackPolicy,
}

impl FailoverTransport {
    pub fn new(primary: ResilientTransport, fallback: FallbackPolicy) -> Self {
        Self { primary, fallback }
    }

    pub fn fallback_enabled(&self) -> bool {
        self.fallback.is_enabled()
    }

    pub fn send(
        &self,
        request: &HttpRequest,
        policy: &RetryPolicy,
        events: &EventWriter,
    ) -> Result<HttpResponse, TransportError> {
        let primary_err = match self.primary.attempt(request, policy, events) {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };
        let FallbackPolicy::Enabled {
            transport,
            policy: fallback_policy,
        } = &self.fallback
        else {
            return Err(primary_err);
        };
        if !primary_err.is_network() {
            return Err(primary_err);
        }

        trace(
            events,
            "transport_fallback",
            json!({
                "url": request.url,
                "exchange": transport.exchange_name(),
                "primary_error": primary_err.message,
                "max_attempts": fallback_policy.max_attempts.max(1),
            }),
        );
        match transport.attempt(request, fallback_policy, events) {
            Ok(response) => Ok(response),
            Err(fallback_err) => {
                trace(
                    events,
                    "transport_fallback_failed",
                    json!({
                        "url": request.url,
                        "error": fallback_err.message,
                        "primary_error": primary_err.message,
                        "user_message": primary_err.user_message(),
                    }),
                );
                Err(primary_err)
            }
        }
    }
}
