use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::{HeaderMap, CONNECTION, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;

use crate::error::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(Vec<FilePart>),
}

/// Transport-agnostic description of one HTTP call; cloned freely across retries.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(url: impl Into<String>, payload: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Json(payload),
        }
    }

    pub fn post_multipart(url: impl Into<String>, parts: Vec<FilePart>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Multipart(parts),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer_auth(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }
}

/// Fully buffered response, identical whichever exchange produced it.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// One HTTP request/response exchange, no retries.
pub trait HttpExchange: Send + Sync {
    fn name(&self) -> &str;
    fn execute(&self, request: &HttpRequest, timeout: Duration)
        -> Result<HttpResponse, TransportError>;
}

/// Primary exchange over a shared, connection-pooling client.
#[derive(Debug, Clone)]
pub struct PooledExchange {
    http: HttpClient,
}

impl PooledExchange {
    pub fn new() -> Result<Self> {
        let http = HttpClient::builder()
            .build()
            .context("failed to build pooled HTTP client")?;
        Ok(Self { http })
    }
}

impl HttpExchange for PooledExchange {
    fn name(&self) -> &str {
        "pooled"
    }

    fn execute(
        &self,
        request: &HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        send_buffered(&self.http, request, timeout, false)
    }
}

/// Sends `request` and reads the whole body before returning.
pub(crate) fn send_buffered(
    http: &HttpClient,
    request: &HttpRequest,
    timeout: Duration,
    close_connection: bool,
) -> Result<HttpResponse, TransportError> {
    let mut builder = http
        .request(request.method.clone(), &request.url)
        .timeout(timeout);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if close_connection {
        builder = builder.header(CONNECTION, "close");
    }
    let builder = attach_body(builder, &request.body)
        .map_err(|err| TransportError::from_reqwest(&err, &request.url))?;
    let response = builder
        .send()
        .map_err(|err| TransportError::from_reqwest(&err, &request.url))?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response
        .bytes()
        .map_err(|err| TransportError::from_reqwest(&err, &request.url))?
        .to_vec();
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn attach_body(
    builder: RequestBuilder,
    body: &RequestBody,
) -> Result<RequestBuilder, reqwest::Error> {
    match body {
        RequestBody::Empty => Ok(builder),
        RequestBody::Json(payload) => Ok(builder.json(payload)),
        RequestBody::Multipart(parts) => {
            let mut form = MultipartForm::new();
            for part in parts {
                let mut file = MultipartPart::bytes(part.bytes.clone())
                    .file_name(part.file_name.clone());
                if let Some(mime) = part.mime_type.as_deref() {
                    file = file.mime_str(mime)?;
                }
                form = form.part(part.field.clone(), file);
            }
            Ok(builder.multipart(form))
        }
    }
}
