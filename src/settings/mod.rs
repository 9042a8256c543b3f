use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::backend::client::DEFAULT_REQUEST_TIMEOUT_MS;
use crate::workflow::driver::{
    WorkflowSettings, DEFAULT_ACTIVE_TIME_CEILING_SECS, DEFAULT_POLL_INTERVAL_MS,
};
use crate::workflow::machine::{WorkflowLimits, DEFAULT_TRANSPORT_FAILURE_LIMIT};
use crate::workflow::retry::DEFAULT_MAX_URL_ATTEMPTS;

pub const DEFAULT_BACKEND_BASE_URL: &str = "http://127.0.0.1:8789";
pub const BACKEND_URL_ENV_VAR: &str = "STICKERDECK_BACKEND_URL";

/// Partial settings from one source. `None` means "not set here"; layers are
/// merged before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientSettingsOverlay {
    pub backend_base_url: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub transport_failure_limit: Option<u32>,
    pub max_url_attempts: Option<u32>,
    /// Zero disables the ceiling.
    pub active_time_ceiling_secs: Option<u64>,
    pub auto_skip_icon: Option<bool>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientSettingsError {
    #[error("failed to read client settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse client settings JSON '{path}': {message}")]
    ParseJson { path: String, message: String },
    #[error("failed to parse client settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("client settings root must be an object")]
    RootMustBeObject,
    #[error("client settings field '{field}' has invalid type or value")]
    InvalidFieldType { field: String },
}

/// Loads the app-level settings file. An explicit path wins; otherwise the
/// TOML file under `config/` is primary with a JSON fallback. A missing file
/// is an empty overlay, not an error.
pub fn load_app_client_settings(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<ClientSettingsOverlay, ClientSettingsError> {
    if let Some(path) = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .map(|p| if p.is_absolute() { p } else { app_root.join(p) })
    {
        return load_optional_overlay_by_extension(path.as_path());
    }

    let toml_path = app_root.join("config/client.settings.toml");
    if toml_path.exists() {
        return load_optional_overlay_from_toml_path(toml_path.as_path());
    }
    load_optional_overlay_from_json_path(app_root.join("config/client.settings.json").as_path())
}

/// Overlay sourced from the process environment.
pub fn overlay_from_env() -> ClientSettingsOverlay {
    overlay_from_env_value(std::env::var(BACKEND_URL_ENV_VAR).ok().as_deref())
}

fn overlay_from_env_value(backend_url: Option<&str>) -> ClientSettingsOverlay {
    ClientSettingsOverlay {
        backend_base_url: backend_url
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        ..ClientSettingsOverlay::default()
    }
}

/// Precedence: overrides, then environment, then the app file.
pub fn merge_client_settings_overlays(
    app: &ClientSettingsOverlay,
    env: &ClientSettingsOverlay,
    overrides: &ClientSettingsOverlay,
) -> ClientSettingsOverlay {
    ClientSettingsOverlay {
        backend_base_url: choose_string(
            overrides.backend_base_url.as_deref(),
            env.backend_base_url.as_deref(),
            app.backend_base_url.as_deref(),
        ),
        request_timeout_ms: overrides
            .request_timeout_ms
            .or(env.request_timeout_ms)
            .or(app.request_timeout_ms),
        poll_interval_ms: overrides
            .poll_interval_ms
            .or(env.poll_interval_ms)
            .or(app.poll_interval_ms),
        transport_failure_limit: overrides
            .transport_failure_limit
            .or(env.transport_failure_limit)
            .or(app.transport_failure_limit),
        max_url_attempts: overrides
            .max_url_attempts
            .or(env.max_url_attempts)
            .or(app.max_url_attempts),
        active_time_ceiling_secs: overrides
            .active_time_ceiling_secs
            .or(env.active_time_ceiling_secs)
            .or(app.active_time_ceiling_secs),
        auto_skip_icon: overrides
            .auto_skip_icon
            .or(env.auto_skip_icon)
            .or(app.auto_skip_icon),
    }
}

pub fn parse_client_settings_overlay_json(
    value: &Value,
) -> Result<ClientSettingsOverlay, ClientSettingsError> {
    let root = value.as_object().ok_or(ClientSettingsError::RootMustBeObject)?;
    let client_value = root.get("client").unwrap_or(value);
    let client = client_value
        .as_object()
        .ok_or(ClientSettingsError::RootMustBeObject)?;

    let mut out = ClientSettingsOverlay::default();
    if let Some(v) = client.get("backend_base_url") {
        out.backend_base_url = Some(parse_string(v, "backend_base_url")?);
    }
    if let Some(v) = client.get("request_timeout_ms") {
        out.request_timeout_ms = Some(parse_positive_u64(v, "request_timeout_ms")?);
    }
    if let Some(workflow) = client.get("workflow") {
        let workflow = workflow
            .as_object()
            .ok_or_else(|| ClientSettingsError::InvalidFieldType {
                field: String::from("workflow"),
            })?;
        if let Some(v) = workflow.get("poll_interval_ms") {
            out.poll_interval_ms = Some(parse_positive_u64(v, "workflow.poll_interval_ms")?);
        }
        if let Some(v) = workflow.get("transport_failure_limit") {
            out.transport_failure_limit =
                Some(parse_positive_u32(v, "workflow.transport_failure_limit")?);
        }
        if let Some(v) = workflow.get("max_url_attempts") {
            out.max_url_attempts = Some(parse_positive_u32(v, "workflow.max_url_attempts")?);
        }
        if let Some(v) = workflow.get("active_time_ceiling_secs") {
            out.active_time_ceiling_secs = Some(parse_u64(v, "workflow.active_time_ceiling_secs")?);
        }
        if let Some(v) = workflow.get("auto_skip_icon") {
            out.auto_skip_icon = Some(parse_bool(v, "workflow.auto_skip_icon")?);
        }
    }
    Ok(out)
}

/// Fully resolved settings with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub backend_base_url: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub transport_failure_limit: u32,
    pub max_url_attempts: u32,
    pub active_time_ceiling: Option<Duration>,
    pub auto_skip_icon: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::resolve(&ClientSettingsOverlay::default())
    }
}

impl ClientSettings {
    pub fn resolve(overlay: &ClientSettingsOverlay) -> Self {
        let ceiling_secs = overlay
            .active_time_ceiling_secs
            .unwrap_or(DEFAULT_ACTIVE_TIME_CEILING_SECS);
        Self {
            backend_base_url: overlay
                .backend_base_url
                .clone()
                .unwrap_or_else(|| String::from(DEFAULT_BACKEND_BASE_URL)),
            request_timeout: Duration::from_millis(
                overlay.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
            ),
            poll_interval: Duration::from_millis(
                overlay.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            transport_failure_limit: overlay
                .transport_failure_limit
                .unwrap_or(DEFAULT_TRANSPORT_FAILURE_LIMIT),
            max_url_attempts: overlay.max_url_attempts.unwrap_or(DEFAULT_MAX_URL_ATTEMPTS),
            active_time_ceiling: (ceiling_secs > 0).then(|| Duration::from_secs(ceiling_secs)),
            auto_skip_icon: overlay.auto_skip_icon.unwrap_or(false),
        }
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        WorkflowSettings {
            poll_interval: self.poll_interval,
            limits: WorkflowLimits {
                transport_failure_limit: self.transport_failure_limit,
                max_url_attempts: self.max_url_attempts,
            },
            active_time_ceiling: self.active_time_ceiling,
        }
    }
}

fn load_optional_overlay_by_extension(
    path: &Path,
) -> Result<ClientSettingsOverlay, ClientSettingsError> {
    match path
        .extension()
        .and_then(|v| v.to_str())
        .map(|v| v.to_ascii_lowercase())
    {
        Some(ext) if ext == "toml" => load_optional_overlay_from_toml_path(path),
        _ => load_optional_overlay_from_json_path(path),
    }
}

fn load_optional_overlay_from_json_path(
    path: &Path,
) -> Result<ClientSettingsOverlay, ClientSettingsError> {
    if !path.exists() {
        return Ok(ClientSettingsOverlay::default());
    }
    let raw = fs::read_to_string(path).map_err(|error| ClientSettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let parsed = serde_json::from_str::<Value>(raw.as_str()).map_err(|error| {
        ClientSettingsError::ParseJson {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    })?;
    parse_client_settings_overlay_json(&parsed)
}

fn load_optional_overlay_from_toml_path(
    path: &Path,
) -> Result<ClientSettingsOverlay, ClientSettingsError> {
    if !path.exists() {
        return Ok(ClientSettingsOverlay::default());
    }
    let raw = fs::read_to_string(path).map_err(|error| ClientSettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let parsed = toml::from_str::<toml::Value>(raw.as_str()).map_err(|error| {
        ClientSettingsError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    })?;
    let json_value =
        serde_json::to_value(parsed).map_err(|error| ClientSettingsError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
    parse_client_settings_overlay_json(&json_value)
}

fn choose_string(a: Option<&str>, b: Option<&str>, c: Option<&str>) -> Option<String> {
    a.or(b).or(c).map(str::to_string)
}

fn parse_string(value: &Value, field: &str) -> Result<String, ClientSettingsError> {
    let parsed = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| ClientSettingsError::InvalidFieldType {
            field: field.to_string(),
        })?;
    if parsed.is_empty() {
        return Err(ClientSettingsError::InvalidFieldType {
            field: field.to_string(),
        });
    }
    Ok(parsed.to_string())
}

fn parse_bool(value: &Value, field: &str) -> Result<bool, ClientSettingsError> {
    value
        .as_bool()
        .ok_or_else(|| ClientSettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_u64(value: &Value, field: &str) -> Result<u64, ClientSettingsError> {
    value
        .as_u64()
        .ok_or_else(|| ClientSettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_positive_u64(value: &Value, field: &str) -> Result<u64, ClientSettingsError> {
    let parsed = parse_u64(value, field)?;
    if parsed == 0 {
        return Err(ClientSettingsError::InvalidFieldType {
            field: field.to_string(),
        });
    }
    Ok(parsed)
}

fn parse_positive_u32(value: &Value, field: &str) -> Result<u32, ClientSettingsError> {
    let parsed = parse_positive_u64(value, field)?;
    u32::try_from(parsed).map_err(|_| ClientSettingsError::InvalidFieldType {
        field: field.to_string(),
    })
}
