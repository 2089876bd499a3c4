//! # API Client
//!
//! Async JSON client for the LMS REST API. Paths are relative to the API base
//! (`http://host/api/v1/`), so `"progress"` resolves to `/api/v1/progress`.

use anyhow::Context;
use reqwest::{
    header::{HeaderMap, CONTENT_TYPE},
    Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

/// Outcome of one request.
///
/// Non-2xx answers are not errors at this level; they come back with
/// `success == false` and the raw body in `error_body`.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// Decoded body of a 2xx response.
    pub data: Option<T>,
    /// Raw body of a non-2xx response.
    pub error_body: Option<String>,
    /// HTTP status code.
    pub status: u16,
    /// `status` is 2xx.
    pub success: bool,
    /// Response headers.
    pub headers: HeaderMap,
}

/// Bearer-authenticated JSON client.
#[derive(Clone)]
pub struct ApiClient {
    inner: ClientWithMiddleware,
    base_url: Url,
    auth_token: Option<String>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl ApiClient {
    /// Creates a client rooted at `base_url`.
    ///
    /// A base without a trailing slash gets one, otherwise `Url::join` would
    /// drop its last segment. `max_retries == 0` disables the retry
    /// middleware entirely.
    ///
    /// # Errors
    /// Fails when `base_url` is not an absolute URL.
    pub fn new(base_url: &str, auth_token: Option<String>, max_retries: u32) -> anyhow::Result<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let url = Url::parse(&normalized).with_context(|| format!("invalid API base url '{base_url}'"))?;

        let mut builder = ClientBuilder::new(reqwest::Client::new());
        if max_retries > 0 {
            let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
            builder = builder.with(RetryTransientMiddleware::new_with_policy(retry_policy));
        }

        Ok(Self {
            inner: builder.build(),
            base_url: url,
            auth_token,
        })
    }

    /// API base every path is joined onto.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL of `path`. A leading `/` is ignored so the API base
    /// path is kept.
    pub fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        let relative = path.trim_start_matches('/');
        self.base_url
            .join(relative)
            .with_context(|| format!("joining '{path}' onto {}", self.base_url))
    }

    /// POSTs `body` as JSON and decodes a 2xx answer into `T`.
    ///
    /// # Errors
    /// URL joining, body encoding, network failures, and 2xx bodies that do
    /// not decode as `T`.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> anyhow::Result<ApiResponse<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let payload = serde_json::to_vec(body).context("encoding request body")?;
        log::debug!("ApiClient: POST {} ({} bytes)", url, payload.len());

        let request = self
            .authorized(self.inner.post(url.clone()))
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        let response = request
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        read_response(response).await
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Splits a response into decoded data or the raw error body. An empty 2xx
/// body yields `data: None`.
async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<ApiResponse<T>> {
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("reading {} response body", status.as_u16()))?;

    let (data, error_body) = if !status.is_success() {
        (None, Some(String::from_utf8_lossy(&bytes).into_owned()))
    } else if bytes.iter().all(u8::is_ascii_whitespace) {
        (None, None)
    } else {
        let decoded = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding {} response body", status.as_u16()))?;
        (Some(decoded), None)
    };

    Ok(ApiResponse {
        data,
        error_body,
        status: status.as_u16(),
        success: status.is_success(),
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_gets_trailing_slash() {
        let client = ApiClient::new("http://localhost:8000/api/v1", None, 0).unwrap();
        assert_eq!(client.base_url().as_str(), "http://localhost:8000/api/v1/");
        assert_eq!(
            client.base_url().join("progress").unwrap().as_str(),
            "http://localhost:8000/api/v1/progress"
        );
    }

    #[test]
    fn paths_stay_under_the_base_path() {
        let client = ApiClient::new("http://localhost:8000/api/v1", None, 0).unwrap();
        for path in ["progress", "/progress"] {
            assert_eq!(
                client.endpoint(path).unwrap().as_str(),
                "http://localhost:8000/api/v1/progress"
            );
        }
    }

    #[test]
    fn relative_base_is_rejected() {
        assert!(ApiClient::new("api/v1", None, 0).is_err());
    }

    #[test]
    fn debug_hides_token() {
        let client = ApiClient::new("http://localhost/", Some("secret".to_string()), 3).unwrap();
        let shown = format!("{client:?}");
        assert!(!shown.contains("secret"));
    }
}
