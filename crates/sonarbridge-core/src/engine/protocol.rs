//! Wire types for the engine's JSON-RPC methods.
//!
//! Field names follow the engine's camelCase convention; optional fields
//! default on the way in so older engines that omit them still deserialize.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::languages::Language;

/// Method names spoken on the engine connection.
pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const SHUTDOWN: &str = "shutdown";
    pub const DID_ADD_CONFIGURATION_SCOPES: &str = "configuration/didAddConfigurationScopes";
    pub const DID_UPDATE_FILE_SYSTEM: &str = "file/didUpdateFileSystem";
    pub const ANALYZE_FILES_AND_TRACK: &str = "analysis/analyzeFilesAndTrack";
    pub const TOOL_CALLED: &str = "telemetry/toolCalled";
    /// Engine → client notification.
    pub const LOG: &str = "log";
}

/// Feature flags negotiated in `initialize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendCapability {
    FullSynchronization,
    ProjectSynchronization,
    Telemetry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConstantInfo {
    pub name: String,
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConstantAttributes {
    pub product_key: String,
    pub product_name: String,
    pub product_version: String,
    pub ide_version: String,
    #[serde(default)]
    pub additional_attributes: BTreeMap<String, serde_json::Value>,
}

/// HTTP settings the engine would use for its own outbound calls. Sent empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfiguration {
    #[serde(default)]
    pub ssl: SslConfiguration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_store_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_store_path: Option<PathBuf>,
}

/// Payload of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub client_constant_info: ClientConstantInfo,
    pub telemetry_constant_attributes: TelemetryConstantAttributes,
    pub http_configuration: HttpConfiguration,
    pub backend_capabilities: Vec<BackendCapability>,
    pub storage_root: PathBuf,
    pub work_dir: PathBuf,
    pub embedded_plugin_paths: Vec<PathBuf>,
    pub enabled_languages_in_standalone_mode: Vec<Language>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationScope {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub bindable: bool,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidAddConfigurationScopesParams {
    pub added_scopes: Vec<ConfigurationScope>,
}

/// A file made known to the engine before it can be analyzed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRegistration {
    pub uri: Url,
    pub ide_relative_path: PathBuf,
    pub config_scope_id: String,
    pub is_test: bool,
    pub charset: String,
    pub fs_path: PathBuf,
    pub content: String,
    #[serde(default)]
    pub detected_language: Option<Language>,
    pub is_user_defined: bool,
}

impl FileRegistration {
    /// Describe an on-disk file under `config_scope_id`.
    ///
    /// `path` must be absolute; the uri is derived from it.
    pub fn new(
        path: PathBuf,
        config_scope_id: impl Into<String>,
        content: impl Into<String>,
        language: Option<Language>,
    ) -> Result<Self, InvalidPath> {
        let uri = Url::from_file_path(&path).map_err(|()| InvalidPath(path.clone()))?;
        Ok(Self {
            uri,
            ide_relative_path: path.clone(),
            config_scope_id: config_scope_id.into(),
            is_test: false,
            charset: "UTF-8".to_string(),
            fs_path: path,
            content: content.into(),
            detected_language: language,
            is_user_defined: true,
        })
    }
}

/// A path that cannot be expressed as a `file:` uri.
#[derive(Debug, thiserror::Error)]
#[error("path is not absolute: {}", .0.display())]
pub struct InvalidPath(pub PathBuf);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidUpdateFileSystemParams {
    #[serde(default)]
    pub added_files: Vec<FileRegistration>,
    #[serde(default)]
    pub changed_files: Vec<FileRegistration>,
    #[serde(default)]
    pub removed_files: Vec<Url>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeFilesAndTrackParams {
    pub config_scope_id: String,
    pub analysis_id: Uuid,
    pub files_to_analyze: Vec<Url>,
    pub extra_properties: BTreeMap<String, String>,
    pub should_fetch_server_issues: bool,
    pub start_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRange {
    pub start_line: u32,
    pub start_line_offset: u32,
    pub end_line: u32,
    pub end_line_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactDto {
    pub software_quality: String,
    pub impact_severity: String,
}

/// An issue as reported by the engine, before any tracking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIssue {
    pub rule_key: String,
    pub primary_message: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub clean_code_attribute: Option<String>,
    #[serde(default)]
    pub impacts: Vec<ImpactDto>,
    #[serde(default)]
    pub text_range: Option<TextRange>,
    #[serde(default)]
    pub quick_fixes: Vec<serde_json::Value>,
}

impl RawIssue {
    pub fn quick_fix_count(&self) -> usize {
        self.quick_fixes.len()
    }
}

/// Outcome of `analysis/analyzeFilesAndTrack`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(default)]
    pub failed_analysis_files: Vec<Url>,
    #[serde(default)]
    pub raw_issues: Vec<RawIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCalledParams {
    pub tool_name: String,
    pub succeeded: bool,
}

/// Severity of an engine `log` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogParams {
    pub level: LogLevel,
    pub message: String,
}
