use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::backend::request::{
    sanitize_request, sanitize_url_name, PackCreationRequest, RequestValidationError,
};
use crate::backend::status::{JobId, StartReply, StatusSnapshot, UrlNameOutcome};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// A user's answer to a pending icon request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconDecision {
    Use(PathBuf),
    Skip,
}

/// What a backend call can fail with, folded into the four categories the
/// workflow reacts to differently.
#[derive(Debug, Error)]
pub enum BackendClientError {
    /// Network-level failure, timeout, 5xx, or an undecodable response body.
    /// Retryable within the poll loop's bounded failure budget.
    #[error("backend transport failure: {message}")]
    Transport { message: String },
    /// The request payload is malformed. Resubmitting it unchanged cannot
    /// succeed, so this is never retried.
    #[error("invalid request field '{field}': {message}")]
    Validation { field: String, message: String },
    /// The job is not currently awaiting the input this call tried to inject.
    #[error("job is not awaiting this input: {message}")]
    NotReady { message: String },
    /// The backend no longer knows the job. Can mean "crashed" or "finished
    /// and garbage-collected"; the workflow decides which.
    #[error("job not found on the backend")]
    NotFound,
}

impl BackendClientError {
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<RequestValidationError> for BackendClientError {
    fn from(error: RequestValidationError) -> Self {
        Self::Validation {
            field: error.field().to_string(),
            message: error.to_string(),
        }
    }
}

/// Request/response surface of the automation backend. Stateless; all
/// workflow state lives in `workflow::WorkflowMachine`.
#[async_trait]
pub trait RemoteJobClient: Send + Sync + 'static {
    async fn start(&self, request: &PackCreationRequest) -> Result<JobId, BackendClientError>;
    async fn poll(&self, job_id: &JobId) -> Result<StatusSnapshot, BackendClientError>;
    async fn resolve_icon(
        &self,
        job_id: &JobId,
        decision: &IconDecision,
    ) -> Result<(), BackendClientError>;
    async fn resolve_url_name(
        &self,
        job_id: &JobId,
        new_name: &str,
    ) -> Result<UrlNameOutcome, BackendClientError>;
}

pub type SharedRemoteJobClient = Arc<dyn RemoteJobClient>;

/// `RemoteJobClient` over the backend's local HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRemoteJobClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpRemoteJobClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendClientError> {
        let base_url = normalize_base_url(base_url.into().as_str())?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            http: reqwest::Client::new(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn start_path() -> &'static str {
        "/api/pack-jobs"
    }

    pub fn status_path(job_id: &JobId) -> String {
        format!("/api/pack-jobs/{}", job_id.as_str())
    }

    pub fn icon_path(job_id: &JobId) -> String {
        format!("/api/pack-jobs/{}/icon", job_id.as_str())
    }

    pub fn url_name_path(job_id: &JobId) -> String {
        format!("/api/pack-jobs/{}/url-name", job_id.as_str())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, BackendClientError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .http
            .get(self.endpoint(path).as_str())
            .header("x-request-id", request_id())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| BackendClientError::Transport {
                message: error.to_string(),
            })?;
        decode_json_response(response).await
    }

    async fn post_json<Req, Res>(
        &self,
        path: &str,
        payload: &Req,
    ) -> Result<Res, BackendClientError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.endpoint(path).as_str())
            .header("x-request-id", request_id())
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(|error| BackendClientError::Transport {
                message: error.to_string(),
            })?;
        decode_json_response(response).await
    }
}

#[async_trait]
impl RemoteJobClient for HttpRemoteJobClient {
    async fn start(&self, request: &PackCreationRequest) -> Result<JobId, BackendClientError> {
        sanitize_request(request)?;
        let body = StartBody::from_request(request);
        let reply: StartReply = self.post_json(Self::start_path(), &body).await?;
        if !reply.ok {
            return Err(BackendClientError::Transport {
                message: String::from("backend acknowledged the start without accepting the job"),
            });
        }
        Ok(reply.job_id)
    }

    async fn poll(&self, job_id: &JobId) -> Result<StatusSnapshot, BackendClientError> {
        self.get_json(Self::status_path(job_id).as_str()).await
    }

    async fn resolve_icon(
        &self,
        job_id: &JobId,
        decision: &IconDecision,
    ) -> Result<(), BackendClientError> {
        let body = IconResolveBody::from_decision(decision);
        let reply: AckReply = self
            .post_json(Self::icon_path(job_id).as_str(), &body)
            .await?;
        if !reply.ok {
            return Err(BackendClientError::Transport {
                message: String::from("backend did not acknowledge the icon decision"),
            });
        }
        Ok(())
    }

    async fn resolve_url_name(
        &self,
        job_id: &JobId,
        new_name: &str,
    ) -> Result<UrlNameOutcome, BackendClientError> {
        sanitize_url_name(new_name)?;
        let body = UrlNameResolveBody {
            name: new_name.trim().to_string(),
        };
        self.post_json(Self::url_name_path(job_id).as_str(), &body)
            .await
    }
}

#[derive(Debug, Serialize)]
struct StartBody {
    title: String,
    url_name: String,
    sticker_files: Vec<String>,
    default_emoji: String,
    icon_path: Option<String>,
    auto_skip_icon: bool,
}

impl StartBody {
    fn from_request(request: &PackCreationRequest) -> Self {
        Self {
            title: request.title.trim().to_string(),
            url_name: request.url_name.trim().to_string(),
            sticker_files: request
                .sticker_files
                .iter()
                .map(|path| path.to_string_lossy().to_string())
                .collect(),
            default_emoji: request.default_emoji.trim().to_string(),
            icon_path: request
                .icon_path
                .as_ref()
                .map(|path| path.to_string_lossy().to_string()),
            auto_skip_icon: request.auto_skip_icon,
        }
    }
}

#[derive(Debug, Serialize)]
struct IconResolveBody {
    icon_path: Option<String>,
    skip: bool,
}

impl IconResolveBody {
    fn from_decision(decision: &IconDecision) -> Self {
        match decision {
            IconDecision::Use(path) => Self {
                icon_path: Some(path.to_string_lossy().to_string()),
                skip: false,
            },
            IconDecision::Skip => Self {
                icon_path: None,
                skip: true,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct UrlNameResolveBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AckReply {
    ok: bool,
}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn normalize_base_url(value: &str) -> Result<String, BackendClientError> {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(BackendClientError::Validation {
            field: String::from("backend_base_url"),
            message: String::from("backend base url must not be empty"),
        });
    }
    let parsed = Url::parse(trimmed).map_err(|error| BackendClientError::Validation {
        field: String::from("backend_base_url"),
        message: error.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(BackendClientError::Validation {
            field: String::from("backend_base_url"),
            message: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(trimmed.to_string())
}

async fn decode_json_response<T>(response: reqwest::Response) -> Result<T, BackendClientError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| BackendClientError::Transport {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(map_http_error(status, &bytes));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| BackendClientError::Transport {
        message: format!("backend response decode failed: {error}"),
    })
}

fn map_http_error(status: StatusCode, body: &[u8]) -> BackendClientError {
    let detail = decode_error_body(body);
    match status {
        StatusCode::NOT_FOUND => BackendClientError::NotFound,
        StatusCode::CONFLICT => BackendClientError::NotReady {
            message: detail.message,
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            BackendClientError::Validation {
                field: detail.field,
                message: detail.message,
            }
        }
        _ => BackendClientError::Transport {
            message: format!("backend returned {status}: {}", detail.message),
        },
    }
}

struct ErrorDetail {
    field: String,
    message: String,
}

fn decode_error_body(body: &[u8]) -> ErrorDetail {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        field: Option<String>,
    }

    let raw = String::from_utf8_lossy(body).trim().to_string();
    let parsed = serde_json::from_slice::<ErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|b| b.error.clone())
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            if raw.is_empty() {
                String::from("<empty>")
            } else {
                raw
            }
        });
    let field = parsed
        .and_then(|b| b.field)
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| String::from("request"));
    ErrorDetail { field, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_helpers_are_deterministic() {
        let job_id = JobId::new("job_abc");
        assert_eq!(HttpRemoteJobClient::start_path(), "/api/pack-jobs");
        assert_eq!(
            HttpRemoteJobClient::status_path(&job_id),
            "/api/pack-jobs/job_abc"
        );
        assert_eq!(
            HttpRemoteJobClient::icon_path(&job_id),
            "/api/pack-jobs/job_abc/icon"
        );
        assert_eq!(
            HttpRemoteJobClient::url_name_path(&job_id),
            "/api/pack-jobs/job_abc/url-name"
        );
    }

    #[test]
    fn base_url_is_normalized_and_validated() {
        let client =
            HttpRemoteJobClient::new("http://127.0.0.1:8789/").expect("client should build");
        assert_eq!(client.base_url(), "http://127.0.0.1:8789");
        assert_eq!(
            client.endpoint("/api/pack-jobs"),
            "http://127.0.0.1:8789/api/pack-jobs"
        );

        let empty = HttpRemoteJobClient::new("   ").expect_err("empty base url should fail");
        assert!(matches!(empty, BackendClientError::Validation { .. }));

        let scheme = HttpRemoteJobClient::new("ftp://127.0.0.1/").expect_err("scheme should fail");
        assert!(matches!(scheme, BackendClientError::Validation { .. }));

        let garbage = HttpRemoteJobClient::new("not a url").expect_err("garbage should fail");
        assert!(matches!(garbage, BackendClientError::Validation { .. }));
    }

    #[test]
    fn http_statuses_map_to_the_error_taxonomy() {
        assert!(matches!(
            map_http_error(StatusCode::NOT_FOUND, b"{}"),
            BackendClientError::NotFound
        ));

        let not_ready = map_http_error(
            StatusCode::CONFLICT,
            br#"{"ok":false,"error":"job is polling, not waiting"}"#,
        );
        match not_ready {
            BackendClientError::NotReady { message } => {
                assert_eq!(message, "job is polling, not waiting");
            }
            other => panic!("expected NotReady, got {other:?}"),
        }

        let validation = map_http_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            br#"{"ok":false,"error":"icon too large","field":"icon_path"}"#,
        );
        match validation {
            BackendClientError::Validation { field, message } => {
                assert_eq!(field, "icon_path");
                assert_eq!(message, "icon too large");
            }
            other => panic!("expected Validation, got {other:?}"),
        }

        let transport = map_http_error(StatusCode::BAD_GATEWAY, b"upstream died");
        match transport {
            BackendClientError::Transport { message } => {
                assert!(message.contains("502"));
                assert!(message.contains("upstream died"));
            }
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[test]
    fn error_body_falls_back_to_raw_text() {
        let detail = decode_error_body(b"plain failure text");
        assert_eq!(detail.message, "plain failure text");
        assert_eq!(detail.field, "request");

        let empty = decode_error_body(b"  ");
        assert_eq!(empty.message, "<empty>");
    }

    #[test]
    fn validation_errors_carry_the_offending_field() {
        let error = BackendClientError::from(RequestValidationError::ControlCharacters {
            field: "title",
        });
        match error {
            BackendClientError::Validation { field, .. } => assert_eq!(field, "title"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn start_rejects_bad_input_before_any_network_call() {
        // Port 9 is the discard service; nothing listens there in CI. The
        // validation error must surface before a connection is attempted.
        let client = HttpRemoteJobClient::new("http://127.0.0.1:9").expect("client should build");
        let request = PackCreationRequest {
            title: String::from("bad\u{0000}title"),
            url_name: String::from("ok_name"),
            sticker_files: vec![std::path::PathBuf::from("/tmp/a.webm")],
            default_emoji: String::from("\u{1F600}"),
            icon_path: None,
            auto_skip_icon: false,
        };

        let error = client
            .start(&request)
            .await
            .expect_err("invalid title should fail fast");
        match error {
            BackendClientError::Validation { field, .. } => assert_eq!(field, "title"),
            other => panic!("expected Validation, got {other:?}"),
        }
    }
}
