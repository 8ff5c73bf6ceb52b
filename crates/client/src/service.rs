//! HTTP client for the knock service.

use std::future::Future;

use knock_protocol::{AuthUrlResponse, KnockBody, Profile, UserProfileResponse, ValidityResponse};
use serde_json::Value;
use tracing::debug;

use crate::error::ServiceError;

/// Remote calls the client makes. [`HttpService`] is the real implementation;
/// tests substitute in-process fakes.
pub trait RemoteService: Send + Sync + 'static {
    /// `GET /auth-url`
    fn auth_url(&self) -> impl Future<Output = Result<String, ServiceError>> + Send;

    /// `GET /user?token&userId`
    fn user_profile(
        &self,
        token: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<Profile, ServiceError>> + Send;

    /// `GET /test?token` - session validity probe.
    fn check_token(
        &self,
        token: &str,
    ) -> impl Future<Output = Result<ValidityResponse, ServiceError>> + Send;

    /// `POST /knock`
    fn knock(&self, body: &KnockBody) -> impl Future<Output = Result<Value, ServiceError>> + Send;
}

pub struct HttpService {
    api_url: String,
    http: reqwest::Client,
}

impl HttpService {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            http: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Returns the response on 2xx, otherwise an error carrying status and body.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, ServiceError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ServiceError::Status {
            operation,
            status,
            body,
        })
    }
}

impl RemoteService for HttpService {
    async fn auth_url(&self) -> Result<String, ServiceError> {
        let response = self.http.get(self.endpoint("/auth-url")).send().await?;
        let response = Self::ensure_success(response, "auth-url request").await?;
        let body: AuthUrlResponse = response.json().await?;
        debug!(
            component = "service",
            event = "service.auth_url",
            "Fetched authorization URL"
        );
        Ok(body.url)
    }

    async fn user_profile(&self, token: &str, user_id: &str) -> Result<Profile, ServiceError> {
        let response = self
            .http
            .get(self.endpoint("/user"))
            .query(&[("token", token), ("userId", user_id)])
            .send()
            .await?;
        let response = Self::ensure_success(response, "user profile lookup").await?;
        let body: UserProfileResponse = response.json().await?;
        Ok(body.into())
    }

    async fn check_token(&self, token: &str) -> Result<ValidityResponse, ServiceError> {
        let response = self
            .http
            .get(self.endpoint("/test"))
            .query(&[("token", token)])
            .send()
            .await?;
        let response = Self::ensure_success(response, "session validity probe").await?;
        response.json().await.map_err(Into::into)
    }

    async fn knock(&self, body: &KnockBody) -> Result<Value, ServiceError> {
        let response = self
            .http
            .post(self.endpoint("/knock"))
            .json(body)
            .send()
            .await?;
        let response = Self::ensure_success(response, "knock").await?;
        response.json().await.map_err(Into::into)
    }
}
