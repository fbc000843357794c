use std::time::Duration;

use rxqa_core::config::Settings;
use rxqa_core::error::AppError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// HTTP client for an Ollama-compatible model server. One instance backs
/// both the chat and the embedding capability.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    timeout: Duration,
}

impl OllamaClient {
    /// Accepts `http(s)://host[:port]` with an optional trailing slash.
    /// Paths, credentials and out-of-range ports are rejected.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        validate_base_url(&base_url).map_err(|reason| {
            AppError::new("AI_PROVIDER_URL_INVALID", "Provider base URL is invalid")
                .with_details(format!("base_url={base_url}; reason={reason}"))
        })?;
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(30),
        })
    }

    /// Client for `provider_base_url` with `request_timeout_secs` applied to
    /// every model call.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        Ok(Self::new(&settings.provider_base_url)?
            .with_timeout(Duration::from_secs(settings.request_timeout_secs)))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        match ureq::get(&url).timeout(Duration::from_millis(800)).call() {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(
                AppError::new("AI_PROVIDER_UNHEALTHY", "Provider health check failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(ureq::Error::Status(code, _)) => Err(
                AppError::new("AI_PROVIDER_UNHEALTHY", "Provider health check failed")
                    .with_details(format!("status={code}")),
            ),
            Err(e) => Err(AppError::new(
                "AI_PROVIDER_UNREACHABLE",
                "Failed to reach model provider",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }

    /// POST a JSON body and decode a JSON response. Failures carry `code`;
    /// transport errors, 429 and 5xx are retryable.
    pub(crate) fn post_json<Req, Resp>(&self, path: &str, body: &Req, code: &str) -> Result<Resp, AppError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let resp = ureq::post(&url).timeout(self.timeout).send_json(body);
        match resp {
            Ok(r) => r.into_json::<Resp>().map_err(|e| {
                AppError::new(code, "Failed to decode provider response")
                    .with_details(format!("path={path}; err={e}"))
            }),
            Err(ureq::Error::Status(status, _)) => Err(
                AppError::new(code, "Provider request failed")
                    .with_details(format!("path={path}; status={status}"))
                    .with_retryable(status == 429 || status >= 500),
            ),
            Err(e) => Err(AppError::new(code, "Failed to call provider endpoint")
                .with_details(format!("path={path}; err={e}"))
                .with_retryable(true)),
        }
    }
}

fn validate_base_url(url: &str) -> Result<(), &'static str> {
    let authority = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or("scheme must be http or https")?;
    if authority.is_empty() {
        return Err("missing host");
    }
    if authority.contains(['/', '?', '#']) {
        return Err("base URL must not carry a path, query or fragment");
    }
    if authority.contains('@') {
        return Err("credentials are not allowed in the base URL");
    }

    let (host, port) = if let Some(rest) = authority.strip_prefix('[') {
        let end = rest.find(']').ok_or("unterminated IPv6 literal")?;
        let after = &rest[end + 1..];
        let port = match after {
            "" => None,
            p => Some(p.strip_prefix(':').ok_or("unexpected text after IPv6 literal")?),
        };
        (&rest[..end], port)
    } else {
        match authority.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err("missing host");
    }
    if let Some(p) = port {
        match p.parse::<u16>() {
            Ok(0) | Err(_) => return Err("port must be within 1..=65535"),
            Ok(_) => {}
        }
    }
    Ok(())
}
