// src/client.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, header};
use url::Url;

use crate::{
    error::ApiError,
    models::submission::{GradingResult, SubmissionReceipt, SubmissionRequest},
};

/// The two calls the session makes against the grading backend.
#[async_trait]
pub trait GradingApi: Send + Sync {
    /// `POST /submissions`
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionReceipt, ApiError>;

    /// `GET /submissions/{id}`
    async fn fetch_result(&self, submission_id: &str) -> Result<GradingResult, ApiError>;
}

/// `GradingApi` over HTTP.
#[derive(Clone)]
pub struct HttpGradingClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpGradingClient {
    pub fn new(base_url: Url, token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: with_trailing_slash(base_url),
            token,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Transport(format!("invalid endpoint {}: {}", path, e)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => builder,
        }
    }
}

#[async_trait]
impl GradingApi for HttpGradingClient {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionReceipt, ApiError> {
        let url = self.endpoint("submissions")?;
        let response = self
            .authorize(self.http.post(url))
            .json(request)
            .send()
            .await?;

        let response = check_status(response, &request.quiz_id).await?;
        Ok(response.json::<SubmissionReceipt>().await?)
    }

    async fn fetch_result(&self, submission_id: &str) -> Result<GradingResult, ApiError> {
        let url = self.endpoint(&format!("submissions/{}", submission_id))?;
        let response = self.authorize(self.http.get(url)).send().await?;

        let response = check_status(response, submission_id).await?;
        Ok(response.json::<GradingResult>().await?)
    }
}

/// Maps non-success statuses. 401/403 are reported as `NotFound` since the
/// caller cannot see the resource either way.
async fn check_status(
    response: reqwest::Response,
    resource: &str,
) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status {
        StatusCode::NOT_FOUND | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(ApiError::NotFound(resource.to_string()))
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// `Url::join` drops the last path segment unless it ends with a slash.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
