//! HTTP probe implementation.

use std::error::Error as StdError;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{redirect, Client, Method};

use super::{classify, CheckRequest, CheckResult, Checker, ProbeError};
use crate::db::HttpMethod;

const MAX_REDIRECTS: usize = 10;

/// Checker backed by reqwest.
///
/// Redirect handling is a client-level setting in reqwest, so one client is
/// kept per policy.
#[derive(Clone)]
pub struct HttpChecker {
    following: Client,
    direct: Client,
}

impl HttpChecker {
    pub fn new(user_agent: &str) -> Result<Self, ProbeError> {
        let build = |policy: redirect::Policy| {
            Client::builder()
                .user_agent(user_agent.to_string())
                .redirect(policy)
                .build()
                .map_err(|e| ProbeError::Config(e.to_string()))
        };

        Ok(Self {
            following: build(redirect::Policy::limited(MAX_REDIRECTS))?,
            direct: build(redirect::Policy::none())?,
        })
    }

    /// Send the request and return the status code plus, when a body match
    /// is configured, the response body.
    async fn execute(&self, request: &CheckRequest) -> Result<(u16, Option<String>), ProbeError> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.direct
        };

        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Post => Method::POST,
        };

        let response = client
            .request(method, &request.url)
            .timeout(request.timeout)
            .headers(build_headers(request)?)
            .send()
            .await
            .map_err(|e| transport_error(e, request))?;

        let status = response.status().as_u16();

        if request.body_match.is_none() {
            return Ok((status, None));
        }

        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, request))?;

        Ok((status, Some(body)))
    }
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, request: &CheckRequest) -> CheckResult {
        let start = Instant::now();
        let result = self.execute(request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((status, body)) => classify(request, status, body.as_deref(), elapsed_ms),
            Err(e) => {
                tracing::debug!(target_id = request.target_id, "Check failed for {}: {}", request.url, e);
                CheckResult::down(None, elapsed_ms, e.to_string())
            }
        }
    }
}

fn build_headers(request: &CheckRequest) -> Result<HeaderMap, ProbeError> {
    let mut headers = HeaderMap::new();
    for entry in &request.headers {
        let name = HeaderName::from_bytes(entry.name.as_bytes())
            .map_err(|_| ProbeError::Config(format!("invalid header name: {}", entry.name)))?;
        // The identifying user agent is fixed per client.
        if name == USER_AGENT {
            continue;
        }
        let value = HeaderValue::from_str(&entry.value)
            .map_err(|_| ProbeError::Config(format!("invalid value for header {}", entry.name)))?;
        headers.append(name, value);
    }
    Ok(headers)
}

fn transport_error(err: reqwest::Error, request: &CheckRequest) -> ProbeError {
    if err.is_timeout() {
        ProbeError::Timeout(request.timeout)
    } else if err.is_redirect() {
        ProbeError::Network(format!("too many redirects (limit {})", MAX_REDIRECTS))
    } else {
        ProbeError::Network(error_chain(&err))
    }
}

/// Flatten an error and its sources into one readable line.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
