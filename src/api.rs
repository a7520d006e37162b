//! Backend API client.
//!
//! Talks JSON to the la Playita backend with the Django session cookie.
//! Mutating requests carry the `X-CSRFToken` header taken from the
//! `csrftoken` cookie.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{multipart, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::SessionCookies;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const CSRF_HEADER: &str = "X-CSRFToken";
pub const CSRF_COOKIE: &str = "csrftoken";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure talking to the backend. `Display` is the message shown to the
/// operator.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Servidor no configurado")]
    NotConfigured,
    #[error("URL del servidor inválida: {0}")]
    InvalidUrl(String),
    #[error("No se puede conectar con el servidor en {0}")]
    Connect(String),
    #[error("La conexión con {0} excedió el tiempo de espera")]
    Timeout(String),
    #[error("Error de red con {url}: {detail}")]
    Network { url: String, detail: String },
    /// Non-2xx reply. `message` is the server's own `error` text when it
    /// sent one.
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("Respuesta inválida del servidor: {0}")]
    InvalidJson(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Convert a `reqwest::Error` into a user-friendly error.
fn friendly_error(url: &str, err: &reqwest::Error) -> ApiError {
    if err.is_connect() {
        return ApiError::Connect(url.to_string());
    }
    if err.is_timeout() {
        return ApiError::Timeout(url.to_string());
    }
    if err.is_builder() {
        return ApiError::InvalidUrl(url.to_string());
    }
    ApiError::Network {
        url: url.to_string(),
        detail: err.to_string(),
    }
}

/// Fallback text for statuses without a server message.
fn status_message(status: StatusCode) -> String {
    match status.as_u16() {
        401 | 403 => "Sesión expirada o sin permisos".to_string(),
        404 => "Recurso no encontrado en el servidor".to_string(),
        s if s >= 500 => format!("Error del servidor (HTTP {s})"),
        s => format!("Respuesta inesperada del servidor (HTTP {s})"),
    }
}

/// Pull `error` / `message` / `mensaje` out of an error body.
fn error_body_message(body: &str) -> Option<String> {
    let json = serde_json::from_str::<Value>(body).ok()?;
    json.get("error")
        .or_else(|| json.get("message"))
        .or_else(|| json.get("mensaje"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// URL and cookie helpers
// ---------------------------------------------------------------------------

/// Normalise the backend base URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

/// Value of one cookie in a `Cookie` header string.
pub fn cookie_value(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn csrf_token_from_cookie(cookie_header: &str) -> Option<String> {
    cookie_value(cookie_header, CSRF_COOKIE)
}

// ---------------------------------------------------------------------------
// Request generations
// ---------------------------------------------------------------------------

/// Monotonic ticket counter. A response is applied only while its ticket
/// is still the latest one issued, so a slow reply to a superseded request
/// cannot overwrite newer state.
#[derive(Debug, Default)]
pub struct RequestGeneration(AtomicU64);

impl RequestGeneration {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, ticket: u64) -> bool {
        self.0.load(Ordering::SeqCst) == ticket
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BackendClient {
    base: String,
    http: Client,
    cookies: SessionCookies,
}

impl BackendClient {
    pub fn new(base_url: &str, cookies: SessionCookies) -> Result<Self, ApiError> {
        let base = normalize_base_url(base_url);
        if base.is_empty() {
            return Err(ApiError::NotConfigured);
        }
        reqwest::Url::parse(&base).map_err(|_| ApiError::InvalidUrl(base.clone()))?;
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network {
                url: base.clone(),
                detail: format!("Failed to create HTTP client: {e}"),
            })?;
        Ok(Self {
            base,
            http,
            cookies,
        })
    }

    /// Client for the configured backend and stored session.
    pub fn from_stored() -> Result<Self, ApiError> {
        let base = crate::config::backend_url().ok_or(ApiError::NotConfigured)?;
        Self::new(&base, SessionCookies::load())
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mutating = method != Method::GET && method != Method::HEAD;
        let mut req = self
            .http
            .request(method, self.url_for(path))
            .header("Accept", "application/json")
            .header("X-Requested-With", "XMLHttpRequest");

        if let Some(cookie) = self.cookies.cookie_header() {
            req = req.header("Cookie", cookie);
        }
        if mutating {
            match self.cookies.csrf_token.as_deref() {
                Some(token) => req = req.header(CSRF_HEADER, token),
                None => warn!(path, "mutating request without a CSRF token"),
            }
            req = req.header("Referer", format!("{}/", self.base));
        }
        req
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(path, self.request(Method::GET, path)).await
    }

    pub async fn get_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        self.send(path, self.request(Method::GET, path).query(query))
            .await
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(path, self.request(Method::POST, path).json(body))
            .await
    }

    /// POST without a body (delete/close style actions).
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(path, self.request(Method::POST, path)).await
    }

    /// POST an `application/x-www-form-urlencoded` body.
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        fields: &[(String, String)],
    ) -> Result<T, ApiError> {
        self.send(path, self.request(Method::POST, path).form(fields))
            .await
    }

    /// Upload one file as `multipart/form-data` under `field`.
    pub async fn post_file<T: DeserializeOwned>(
        &self,
        path: &str,
        field: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<T, ApiError> {
        let part = multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = multipart::Form::new().part(field.to_string(), part);
        self.send(path, self.request(Method::POST, path).multipart(form))
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        req: RequestBuilder,
    ) -> Result<T, ApiError> {
        let resp = req.send().await.map_err(|e| friendly_error(&self.base, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let message =
                error_body_message(&body_text).unwrap_or_else(|| status_message(status));
            warn!(path, status = status.as_u16(), %message, "backend request failed");
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        debug!(path, status = status.as_u16(), bytes = body_text.len(), "backend response");
        let raw = if body_text.trim().is_empty() {
            "null"
        } else {
            body_text.as_str()
        };
        serde_json::from_str(raw).map_err(|e| ApiError::InvalidJson(e.to_string()))
    }
}
