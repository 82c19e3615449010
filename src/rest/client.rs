use crate::auth::Credentials;
use crate::backoff::ExponentialBackoff;
use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client as HttpClient, Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

const ACCOUNT_HEADER: &str = "x-account-id";

/// One logical HTTP exchange, rebuilt for every attempt.
#[derive(Debug, Clone)]
pub struct RestRequest {
    pub method: Method,
    pub path: String,
    /// Already-encoded query string, without the leading `?`.
    pub query: Option<String>,
    /// JSON body.
    pub body: Option<String>,
    pub authenticated: bool,
}

impl RestRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            body: None,
            authenticated: false,
        }
    }

    pub fn query<Q: Serialize>(mut self, params: &Q) -> Result<Self> {
        let encoded = serde_qs::to_string(params)?;
        self.query = (!encoded.is_empty()).then_some(encoded);
        Ok(self)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = Some(serde_json::to_string(body)?);
        Ok(self)
    }

    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }
}

/// Generic response envelope: `{"result": ..., "error": {"code", "message"}}`.
#[derive(Deserialize, Debug)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// HTTP client that retries transient failures.
///
/// Network failures and 5xx responses are retried up to `max_retries` attempts
/// in total, waiting `retry_base_wait * 2^(attempt - 1)` after each failed
/// attempt. 4xx responses fail immediately.
///
/// # Examples
///
/// ```no_run
/// use rpc_connector_rs::config::ClientConfig;
/// use rpc_connector_rs::rest::Client;
/// use serde_json::{json, Value};
///
/// #[tokio::main]
/// async fn main() {
///     let config = ClientConfig::new("wss://example.com/ws/api/v2", "https://example.com/api/v2");
///     let client = Client::new(&config, None).expect("Failed to create client");
///
///     let ticker: Value = client
///         .get("/public/ticker", &json!({"instrument_name": "BTC-PERPETUAL"}), false)
///         .await
///         .expect("Failed to get ticker");
///     println!("Ticker: {:?}", ticker);
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    /// The underlying HTTP client used for making requests.
    http_client: HttpClient,
    /// Base URL every request path is joined onto.
    base_url: Url,
    credentials: Option<Credentials>,
    max_retries: u32,
    backoff: ExponentialBackoff,
    // timeout is configured directly in the HttpClient
}

impl Client {
    /// Creates a client for `config.rest_url`.
    pub fn new(config: &ClientConfig, credentials: Option<Credentials>) -> Result<Self> {
        Self::with_base_url(
            &config.rest_url,
            credentials,
            config.http_timeout,
            config.max_retries,
            config.retry_base_wait,
        )
    }

    pub fn with_base_url(
        base_url: &str,
        credentials: Option<Credentials>,
        timeout: Duration,
        max_retries: u32,
        retry_base_wait: Duration,
    ) -> Result<Self> {
        // Trailing slash so relative joins keep any base path.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{}/", base_url))?
        };
        let http_client = HttpClient::builder().timeout(timeout).build()?; // Propagates reqwest::Error via From trait in RpcError

        Ok(Self {
            http_client,
            base_url,
            credentials,
            max_retries: max_retries.max(1),
            backoff: ExponentialBackoff::new(retry_base_wait),
        })
    }

    pub async fn get<Q, R>(&self, path: &str, query: &Q, authenticated: bool) -> Result<R>
    where
        Q: Serialize,
        R: DeserializeOwned,
    {
        let mut request = RestRequest::new(Method::GET, path).query(query)?;
        request.authenticated = authenticated;
        self.execute(request).await
    }

    pub async fn post<B, R>(&self, path: &str, body: &B, authenticated: bool) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = RestRequest::new(Method::POST, path).json(body)?;
        request.authenticated = authenticated;
        self.execute(request).await
    }

    pub async fn delete<Q, R>(&self, path: &str, query: &Q, authenticated: bool) -> Result<R>
    where
        Q: Serialize,
        R: DeserializeOwned,
    {
        let mut request = RestRequest::new(Method::DELETE, path).query(query)?;
        request.authenticated = authenticated;
        self.execute(request).await
    }

    /// Runs the exchange and decodes the envelope's `result` as `R`.
    ///
    /// An absent result decodes from `null`, so `()` and `Option<T>` targets
    /// accept it.
    pub async fn execute<R: DeserializeOwned>(&self, request: RestRequest) -> Result<R> {
        let result = self.execute_raw(request).await?;
        Ok(serde_json::from_value(result.unwrap_or(Value::Null))?)
    }

    /// Runs the exchange with retries and returns the untyped result.
    pub async fn execute_raw(&self, request: RestRequest) -> Result<Option<Value>> {
        let mut attempt = 1;
        loop {
            let http_request = self.build_request(&request)?;
            let outcome = match self.http_client.execute(http_request).await {
                Ok(response) => Self::handle_response(response).await,
                Err(e) => Err(RpcError::ReqwestError(e)),
            };

            let error = match outcome {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };
            warn!(
                "{} {} failed on attempt {}/{}: {}",
                request.method, request.path, attempt, self.max_retries, error
            );
            if attempt >= self.max_retries {
                return Err(RpcError::MaxRetriesExceeded {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let wait = self.backoff.delay(attempt);
            debug!("Retrying {} {} in {:?}", request.method, request.path, wait);
            sleep(wait).await;
            attempt += 1;
        }
    }

    /// Builds a reqwest::Request, adding bearer and account headers when authenticated.
    fn build_request(&self, request: &RestRequest) -> Result<Request> {
        let mut url = self.base_url.join(request.path.trim_start_matches('/'))?;
        url.set_query(request.query.as_deref());

        let mut headers = HeaderMap::new();
        if request.authenticated {
            let credentials = self.credentials.as_ref().ok_or_else(|| {
                RpcError::AuthenticationError(
                    "authenticated request without credentials".to_string(),
                )
            })?;
            let bearer = format!("Bearer {}", credentials.token()?);
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&bearer)?);
            if let Some(account) = credentials.account() {
                headers.insert(
                    HeaderName::from_static(ACCOUNT_HEADER),
                    HeaderValue::from_str(account)?,
                );
            }
        }

        let mut request_builder = self
            .http_client
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(body) = &request.body {
            request_builder = request_builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        Ok(request_builder.build()?)
    }

    /// Shared logic to handle response status and envelope parsing.
    async fn handle_response(response: Response) -> Result<Option<Value>> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if status.is_success() {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(None);
            }
            let envelope: Envelope = serde_json::from_slice(&body)?;
            if let Some(error) = envelope.error {
                return Err(RpcError::ApiError {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(envelope.result);
        }

        Err(Self::status_error(status, headers, &body))
    }

    fn status_error(status: StatusCode, headers: HeaderMap, body: &[u8]) -> RpcError {
        // Prefer the envelope's error object, then a bare {code, message} body.
        let parsed = serde_json::from_slice::<Value>(body).ok().and_then(|value| {
            let error = value.get("error").cloned().unwrap_or(value);
            serde_json::from_value::<ApiErrorBody>(error).ok()
        });

        let (code, message, data) = match parsed {
            Some(error) if !error.message.is_empty() => (error.code, error.message, error.data),
            _ => (
                0, // Unknown code
                format!(
                    "Request failed with status {} (could not parse error body)",
                    status
                ),
                None,
            ),
        };

        if status.is_client_error() {
            RpcError::ClientError {
                status,
                code,
                message,
                data,
                header: headers,
            }
        } else {
            RpcError::ServerError {
                status,
                code,
                message,
                header: headers,
            }
        }
    }
}
