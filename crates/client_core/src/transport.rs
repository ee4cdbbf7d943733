use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, PRAGMA},
    multipart::{Form, Part},
    Client, Method, RequestBuilder, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use shared::{domain::normalize_server_url, error::server_error_message};
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Method, body, headers and deadline for one JSON call.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    pub fn json(mut self, body: &impl Serialize) -> Result<Self> {
        let body = serde_json::to_value(body)
            .map_err(|err| ClientError::InvalidInput(format!("unserializable body: {err}")))?;
        self.body = Some(body);
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// In-memory file handed to a multipart upload.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl FileUpload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn into_form(self, field: &'static str) -> Result<Form> {
        let mut part = Part::bytes(self.bytes).file_name(self.filename);
        if let Some(mime_type) = self.mime_type {
            part = part.mime_str(&mime_type)?;
        }
        Ok(Form::new().part(field, part))
    }
}

pub struct HttpTransport {
    http: Client,
    base_url: String,
    request_timeout: Duration,
    upload_timeout: Duration,
}

impl HttpTransport {
    pub fn new(base_url: &str, request_timeout: Duration, upload_timeout: Duration) -> Result<Self> {
        let base_url = normalize_server_url(base_url);
        let parsed = url::Url::parse(&base_url).map_err(|err| ClientError::InvalidUrl {
            url: base_url.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidUrl {
                url: base_url,
                reason: "server url must start with http:// or https://".into(),
            });
        }

        Ok(Self {
            http: Client::new(),
            base_url,
            request_timeout,
            upload_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
        token: Option<&str>,
    ) -> Result<T> {
        let value = self.request_value(path, options, token).await?;
        serde_json::from_value(value).map_err(|source| ClientError::Decode {
            path: path.to_string(),
            source,
        })
    }

    pub async fn request_value(
        &self,
        path: &str,
        options: RequestOptions,
        token: Option<&str>,
    ) -> Result<Value> {
        let RequestOptions {
            method,
            body,
            mut headers,
            timeout,
        } = options;

        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(token) = token {
            headers.insert(AUTHORIZATION, bearer(token)?);
        }

        debug!(method = %method, path, "http request");
        let mut request = self.http.request(method, self.url_for(path)).headers(headers);
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let (status, body) = self
            .exchange(path, request, timeout.unwrap_or(self.request_timeout))
            .await?;
        if !status.is_success() {
            return Err(http_error(path, status, &body, None));
        }
        parse_json_body(path, &body)
    }

    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        form: Form,
        token: Option<&str>,
    ) -> Result<T> {
        let mut request = self.http.post(self.url_for(path)).multipart(form);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, bearer(token)?);
        }

        debug!(path, "multipart upload");
        let (status, body) = self.exchange(path, request, self.upload_timeout).await?;
        if !status.is_success() {
            return Err(http_error(path, status, &body, Some("Upload failed")));
        }
        let value = parse_json_body(path, &body)?;
        serde_json::from_value(value).map_err(|source| ClientError::Decode {
            path: path.to_string(),
            source,
        })
    }

    /// Binary GET. `404` and empty bodies yield `None`.
    pub async fn fetch_bytes(&self, path: &str, token: Option<&str>) -> Result<Option<Vec<u8>>> {
        let mut request = self.http.get(self.url_for(path));
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, bearer(token)?);
        }

        let (status, body) = self.exchange(path, request, self.request_timeout).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(http_error(path, status, &body, None));
        }
        Ok((!body.is_empty()).then_some(body))
    }

    /// Uncached GET used for liveness checks; only the status matters.
    pub async fn check_status(&self, path: &str) -> Result<StatusCode> {
        let request = self
            .http
            .get(self.url_for(path))
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache");
        let (status, _) = self.exchange(path, request, self.request_timeout).await?;
        Ok(status)
    }

    async fn exchange(
        &self,
        path: &str,
        request: RequestBuilder,
        after: Duration,
    ) -> Result<(StatusCode, Vec<u8>)> {
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body.to_vec()))
        };

        match tokio::time::timeout(after, exchange).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) if err.is_timeout() => Err(ClientError::Timeout {
                path: path.to_string(),
                after,
            }),
            Ok(Err(err)) => {
                warn!(path, "http transport failure: {err}");
                Err(ClientError::Transport(err))
            }
            Err(_) => {
                warn!(path, ?after, "http request timed out");
                Err(ClientError::Timeout {
                    path: path.to_string(),
                    after,
                })
            }
        }
    }
}

fn bearer(token: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| ClientError::InvalidInput("token contains invalid header characters".into()))
}

fn http_error(path: &str, status: StatusCode, body: &[u8], fallback: Option<&str>) -> ClientError {
    let mut message = server_error_message(&String::from_utf8_lossy(body));
    if message.is_empty() {
        message = fallback
            .or(status.canonical_reason())
            .unwrap_or("request failed")
            .to_string();
    }
    warn!(path, status = status.as_u16(), %message, "http request failed");
    ClientError::Http {
        status: status.as_u16(),
        message,
    }
}

fn parse_json_body(path: &str, body: &[u8]) -> Result<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|source| ClientError::Decode {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
