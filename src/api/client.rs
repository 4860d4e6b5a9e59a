//! Authenticated HTTP client for the calendar API
//!
//! Wraps reqwest::Client with bearer token injection from the broker and a
//! single invalidate-and-retry on 401.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use url::Url;

use crate::auth::{ScopeSet, TokenBroker, TokenGrant};
use crate::error::ApiError;

/// Request template, rebuilt for every attempt.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(&'static str, String)>,
}

impl ApiRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    broker: Arc<TokenBroker>,
    scopes: ScopeSet,
}

impl ApiClient {
    /// Client requesting the authority's declared scopes for every call.
    pub fn new(broker: Arc<TokenBroker>) -> Self {
        let scopes = broker.authority().scopes.clone();
        Self {
            http: reqwest::Client::new(),
            broker,
            scopes,
        }
    }

    pub fn broker(&self) -> &TokenBroker {
        &self.broker
    }

    /// Send `request` with a bearer token and return the response body.
    pub async fn send(&self, request: &ApiRequest) -> Result<String, ApiError> {
        let grant = self.broker.get_access_token(&self.scopes).await?;

        match self.attempt(request, &grant).await {
            Err(ApiError::Unauthorized) => {
                tracing::warn!(
                    "401 Unauthorized for {}, renewing token and retrying once",
                    request.url
                );
                self.broker.invalidate(&grant).await;
                let grant = self.broker.get_access_token(&self.scopes).await?;
                self.attempt(request, &grant).await
            }
            other => other,
        }
    }

    async fn attempt(&self, request: &ApiRequest, grant: &TokenGrant) -> Result<String, ApiError> {
        tracing::debug!("{} {}", request.method, request.url);

        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .bearer_auth(&grant.access_token);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("{} {}: {}", request.method, request.url, e)))?;

        check_response(resp)
            .await?
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("reading body of {}: {}", request.url, e)))
    }
}

/// Check HTTP response status code and return a typed error on failure.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::auth::testing::{authority_with_api, FakeProvider};
    use crate::error::AuthError;

    async fn client(server: &MockServer, provider: &Arc<FakeProvider>) -> ApiClient {
        let authority = authority_with_api(&format!("{}/me/calendar", server.uri()));
        ApiClient::new(Arc::new(TokenBroker::new(
            Arc::new(authority),
            provider.clone(),
        )))
    }

    fn request(server: &MockServer) -> ApiRequest {
        ApiRequest::get(Url::parse(&format!("{}/me/calendar/calendarView", server.uri())).unwrap())
    }

    #[tokio::test]
    async fn test_bearer_token_attached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me/calendar/calendarView"))
            .and(header("Authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::signed_in());
        let client = client(&server, &provider).await;

        let body = client.send(&request(&server)).await.unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_extra_headers_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Prefer", "outlook.timezone=\"UTC\""))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::signed_in());
        let client = client(&server, &provider).await;

        let req = request(&server).header("Prefer", "outlook.timezone=\"UTC\"");
        tokio_test::assert_ok!(client.send(&req).await);
    }

    #[tokio::test]
    async fn test_unauthorized_retried_once_with_fresh_token() {
        let server = MockServer::start().await;
        Mock::given(header("Authorization", "Bearer token-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(header("Authorization", "Bearer token-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::signed_in());
        let client = client(&server, &provider).await;

        let body = client.send(&request(&server)).await.unwrap();
        assert_eq!(body, "ok");
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
        assert_eq!(provider.silent_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::signed_in());
        let client = client(&server, &provider).await;

        let err = client.send(&request(&server)).await.unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
    }

    #[tokio::test]
    async fn test_server_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::signed_in());
        let client = client(&server, &provider).await;

        let err = client.send(&request(&server)).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 503,
                body: "busy".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_auth_failure_skips_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider = Arc::new(FakeProvider::new().with_interactive_error(AuthError::UserCancelled));
        let client = client(&server, &provider).await;

        let err = client.send(&request(&server)).await.unwrap_err();
        assert_eq!(err, ApiError::Auth(AuthError::UserCancelled));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_failure() {
        let provider = Arc::new(FakeProvider::signed_in());
        let server = MockServer::start().await;
        let client = client(&server, &provider).await;
        let req = ApiRequest::get(Url::parse("http://127.0.0.1:9/calendarView").unwrap());

        let err = client.send(&req).await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)), "{:?}", err);
    }
}
