//! Connection to TheOldReader API.
//!
//! [`Connection`] owns the credentials and the current auth token and is the
//! sole gateway for outbound calls. Token acquisition is a guarded state
//! transition (logged out → logging in → logged in) behind an async mutex,
//! so concurrent first-time callers issue exactly one login request.
//! `Connection` is therefore safe to share across tasks via `Arc`.
use crate::error::ApiError;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

const DEFAULT_API_BASE: &str = "https://theoldreader.com/reader/api/0/";
const DEFAULT_LOGIN_URL: &str = "https://theoldreader.com/accounts/ClientLogin";
const DEFAULT_CLIENT_ID: &str = "oldreader-rs";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fixed login form constants required by the ClientLogin endpoint.
const ACCOUNT_TYPE: &str = "HOSTED_OR_GOOGLE";
const SERVICE: &str = "reader";

/// HTTP method selection for [`Connection::make_request`].
///
/// The API only ever uses GET (reads) and POST (login and edits), so this
/// stays a closed two-variant enum rather than exposing `reqwest::Method`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// Auth token lifecycle. `LoggingIn` is only ever observed by the task
/// holding the auth mutex; everyone else waits on the lock.
#[derive(Debug)]
enum AuthState {
    LoggedOut,
    LoggingIn,
    LoggedIn(SecretString),
}

/// Authenticated connection to TheOldReader API.
///
/// Created via [`Connection::builder`]. The auth token starts absent and is
/// set once by the first successful login (explicit or implicit via
/// [`make_request`](Connection::make_request)); it is reused for the
/// connection's lifetime and never refreshed or invalidated automatically.
#[derive(Debug)]
pub struct Connection {
    http: reqwest::Client,
    email: String,
    password: SecretString,
    client_id: String,
    user_agent: String,
    api_base: Url,
    login_url: Url,
    timeout: Duration,
    auth: Mutex<AuthState>,
}

/// Builder for [`Connection`].
///
/// Only the credentials are required; everything else defaults to the
/// production endpoints. The base URL overrides exist so tests can point
/// the connection at a local mock server.
pub struct ConnectionBuilder {
    email: String,
    password: SecretString,
    client_id: String,
    user_agent: Option<String>,
    api_base: String,
    login_url: String,
    timeout: Duration,
    http: Option<reqwest::Client>,
}

impl ConnectionBuilder {
    fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            user_agent: None,
            api_base: DEFAULT_API_BASE.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            http: None,
        }
    }

    /// Client identifier sent in the login form (default: `oldreader-rs`).
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Override the User-Agent header (default: `<client id>/<version>`).
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Override the API base path (a trailing slash is appended if missing).
    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Override the ClientLogin endpoint URL.
    pub fn login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = login_url.into();
        self
    }

    /// Per-request timeout (default: 30s). Transport-level policy beyond
    /// this belongs to a custom [`http_client`](Self::http_client).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Supply a pre-configured `reqwest::Client` (pooling, proxies, TLS).
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Validate the endpoint URLs and build the connection.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidUrl`] if either base URL does not parse.
    pub fn build(self) -> Result<Connection, ApiError> {
        let mut api_base = self.api_base;
        if !api_base.ends_with('/') {
            api_base.push('/');
        }
        let api_base = Url::parse(&api_base)?;
        let login_url = Url::parse(&self.login_url)?;
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("{}/{}", self.client_id, env!("CARGO_PKG_VERSION")));

        Ok(Connection {
            http: self.http.unwrap_or_default(),
            email: self.email,
            password: self.password,
            client_id: self.client_id,
            user_agent,
            api_base,
            login_url,
            timeout: self.timeout,
            auth: Mutex::new(AuthState::LoggedOut),
        })
    }
}

impl Connection {
    /// Start building a connection with the given account credentials.
    pub fn builder(
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> ConnectionBuilder {
        ConnectionBuilder::new(email, password)
    }

    /// Resolve a path relative to the API base, e.g. `edit-tag`.
    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.api_base.join(path)?)
    }

    /// Log in and store the auth token.
    ///
    /// Optional overrides fall back to the credentials the connection was
    /// built with. Replaces any previously stored token.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Authentication`] if the server rejects the login
    /// - [`ApiError::MalformedResponse`] if the response lacks a usable
    ///   `Auth` token
    pub async fn login(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), ApiError> {
        let user = username.unwrap_or(&self.email).to_string();
        let pass = password
            .map(|p| SecretString::from(p.to_string()))
            .unwrap_or_else(|| self.password.clone());

        let mut auth = self.auth.lock().await;
        *auth = AuthState::LoggingIn;
        match self.request_token(&user, &pass).await {
            Ok(token) => {
                *auth = AuthState::LoggedIn(token);
                tracing::info!(user = %user, "Logged in");
                Ok(())
            }
            Err(e) => {
                *auth = AuthState::LoggedOut;
                Err(e)
            }
        }
    }

    /// Issue an authenticated request and parse the JSON response.
    ///
    /// If no auth token is present yet, logs in first with the stored
    /// credentials, exactly once; a login failure aborts the request.
    /// Always forces the `output=json` parameter. GET sends `params` as
    /// query parameters, POST as a form body.
    ///
    /// Returns `Ok(None)` when the body is empty or not JSON: several edit
    /// endpoints return `OK` or nothing on success, so an unparsable body
    /// is deliberately not an error here. Callers that require a body must
    /// treat `None` as malformed themselves.
    ///
    /// # Errors
    ///
    /// - [`ApiError::HttpStatus`] on any non-2xx response
    /// - [`ApiError::Timeout`] / [`ApiError::Network`] from the transport
    /// - login errors, when this call had to log in first
    pub async fn make_request(
        &self,
        url: Url,
        params: &[(&str, String)],
        method: Method,
    ) -> Result<Option<Value>, ApiError> {
        let token = self.ensure_token().await?;

        let mut merged: Vec<(&str, String)> = vec![("output", "json".to_string())];
        merged.extend(params.iter().map(|(k, v)| (*k, v.clone())));

        tracing::debug!(url = %url, method = ?method, "Issuing API request");

        let request = match method {
            Method::Get => self.http.get(url.clone()).query(&merged),
            Method::Post => self.http.post(url.clone()).form(&merged),
        }
        .header(USER_AGENT, &self.user_agent)
        .header(
            AUTHORIZATION,
            format!("GoogleLogin auth={}", token.expose_secret()),
        );

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout(self.timeout))?
            .map_err(ApiError::Network)?;

        if !response.status().is_success() {
            return Err(ApiError::HttpStatus(response.status().as_u16()));
        }

        let body = response.text().await.map_err(ApiError::Network)?;
        match serde_json::from_str(&body) {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                tracing::debug!(url = %url, "Response body is not JSON, treating as empty result");
                Ok(None)
            }
        }
    }

    /// Return the stored token, logging in first if none exists.
    ///
    /// The mutex is held across the login round trip, so concurrent callers
    /// on a fresh connection serialize here and only one login is issued.
    async fn ensure_token(&self) -> Result<SecretString, ApiError> {
        let mut auth = self.auth.lock().await;
        if let AuthState::LoggedIn(token) = &*auth {
            return Ok(token.clone());
        }

        *auth = AuthState::LoggingIn;
        match self.request_token(&self.email, &self.password).await {
            Ok(token) => {
                *auth = AuthState::LoggedIn(token.clone());
                tracing::info!(user = %self.email, "Logged in");
                Ok(token)
            }
            Err(e) => {
                *auth = AuthState::LoggedOut;
                Err(e)
            }
        }
    }

    /// POST the ClientLogin form and extract the `Auth` token.
    ///
    /// Issued directly, never through `make_request`: the login request
    /// carries no Authorization header and must not trigger another login.
    async fn request_token(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<SecretString, ApiError> {
        let form: Vec<(&str, String)> = vec![
            ("output", "json".to_string()),
            ("client", self.client_id.clone()),
            ("accountType", ACCOUNT_TYPE.to_string()),
            ("service", SERVICE.to_string()),
            ("Email", username.to_string()),
            ("Passwd", password.expose_secret().to_string()),
        ];

        let request = self
            .http
            .post(self.login_url.clone())
            .form(&form)
            .header(USER_AGENT, &self.user_agent);

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout(self.timeout))?
            .map_err(ApiError::Network)?;

        if !response.status().is_success() {
            return Err(ApiError::Authentication(response.status().as_u16()));
        }

        let body = response.text().await.map_err(ApiError::Network)?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|_| ApiError::MalformedResponse("login response is not JSON".into()))?;
        let token = value
            .get("Auth")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ApiError::MalformedResponse("login response missing Auth field".into())
            })?;
        if token.is_empty() {
            return Err(ApiError::MalformedResponse(
                "login returned an empty Auth token".into(),
            ));
        }

        Ok(SecretString::from(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn connection(server: &MockServer) -> Connection {
        Connection::builder("user@example.com", "hunter2")
            .api_base(format!("{}/reader/api/0/", server.uri()))
            .login_url(format!("{}/accounts/ClientLogin", server.uri()))
            .build()
            .unwrap()
    }

    async fn mount_login(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/accounts/ClientLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Auth":"token123"}"#))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_login_success_then_request_carries_token() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/reader/api/0/ping"))
            .and(header("Authorization", "GoogleLogin auth=token123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        conn.login(None, None).await.unwrap();

        let url = conn.endpoint("ping").unwrap();
        let result = conn.make_request(url, &[], Method::Get).await.unwrap();
        assert_eq!(result.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_login_sends_credential_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/ClientLogin"))
            .and(body_string_contains("accountType=HOSTED_OR_GOOGLE"))
            .and(body_string_contains("service=reader"))
            .and(body_string_contains("Email=user%40example.com"))
            .and(body_string_contains("Passwd=hunter2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Auth":"token123"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        conn.login(None, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_login_with_override_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/ClientLogin"))
            .and(body_string_contains("Email=other%40example.com"))
            .and(body_string_contains("Passwd=s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Auth":"token123"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        conn.login(Some("other@example.com"), Some("s3cret"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/ClientLogin"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let err = conn.login(None, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(403)));
    }

    #[tokio::test]
    async fn test_login_response_missing_auth_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/ClientLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"SID":"abc"}"#))
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let err = conn.login(None, None).await.unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_login_response_empty_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/ClientLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Auth":""}"#))
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let err = conn.login(None, None).await.unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_make_request_logs_in_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/ClientLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Auth":"token123"}"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reader/api/0/ping"))
            .and(header("Authorization", "GoogleLogin auth=token123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let url = conn.endpoint("ping").unwrap();
        conn.make_request(url, &[], Method::Get).await.unwrap();
    }

    #[tokio::test]
    async fn test_login_request_carries_no_auth_header() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let url = conn.endpoint("ping").unwrap();
        conn.make_request(url, &[], Method::Get).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let login = requests
            .iter()
            .find(|r| r.url.path() == "/accounts/ClientLogin")
            .expect("login request was issued");
        assert!(
            login.headers.get("authorization").is_none(),
            "login must not carry an Authorization header"
        );
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_log_in_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/ClientLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Auth":"token123"}"#))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reader/api/0/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(2)
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let url = conn.endpoint("ping").unwrap();
        let (a, b) = tokio::join!(
            conn.make_request(url.clone(), &[], Method::Get),
            conn.make_request(url, &[], Method::Get)
        );
        a.unwrap();
        b.unwrap();
    }

    #[tokio::test]
    async fn test_login_failure_aborts_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/accounts/ClientLogin"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/reader/api/0/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(0)
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let url = conn.endpoint("ping").unwrap();
        let err = conn.make_request(url, &[], Method::Get).await.unwrap_err();
        assert!(matches!(err, ApiError::Authentication(403)));
    }

    #[tokio::test]
    async fn test_output_json_always_sent() {
        use wiremock::matchers::query_param;

        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/reader/api/0/ping"))
            .and(query_param("output", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let url = conn.endpoint("ping").unwrap();
        conn.make_request(url, &[], Method::Get).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_2xx_propagates() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/reader/api/0/ping"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let url = conn.endpoint("ping").unwrap();
        let err = conn.make_request(url, &[], Method::Get).await.unwrap_err();
        assert!(matches!(err, ApiError::HttpStatus(500)));
    }

    #[tokio::test]
    async fn test_non_json_body_is_empty_result() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("POST"))
            .and(path("/reader/api/0/edit-tag"))
            .respond_with(ResponseTemplate::new(200).set_body_string("OK"))
            .mount(&server)
            .await;

        let conn = connection(&server).await;
        let url = conn.endpoint("edit-tag").unwrap();
        let result = conn.make_request(url, &[], Method::Post).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/reader/api/0/ping"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("{}")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let conn = Connection::builder("user@example.com", "hunter2")
            .api_base(format!("{}/reader/api/0/", server.uri()))
            .login_url(format!("{}/accounts/ClientLogin", server.uri()))
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let url = conn.endpoint("ping").unwrap();
        let err = conn.make_request(url, &[], Method::Get).await.unwrap_err();
        assert!(matches!(err, ApiError::Timeout(_)));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = Connection::builder("user@example.com", "hunter2")
            .api_base("not a url")
            .build();
        assert!(matches!(result, Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        let conn = Connection::builder("user@example.com", "super-secret")
            .build()
            .unwrap();
        let debug = format!("{:?}", conn);
        assert!(!debug.contains("super-secret"));
    }
}
