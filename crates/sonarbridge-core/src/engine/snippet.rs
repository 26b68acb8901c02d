//! Analysis of an in-memory code snippet.
//!
//! The engine only analyzes registered files, so the snippet is written to a
//! temporary file in the work directory, registered, analyzed, and then both
//! the registration and the file are removed whatever the outcome.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use super::EngineError;
use super::bridge::{AnalysisSession, EngineBridge, PROJECT_ID};
use super::languages::Language;
use super::protocol::{AnalysisResult, FileRegistration};

/// Language assumed when the caller does not name one.
pub const DEFAULT_LANGUAGE: Language = Language::Secrets;

const FALLBACK_SUFFIX: &str = ".txt";

/// Path of the temporary file for one snippet analysis.
pub fn snippet_path(work_dir: &Path, language: Option<Language>) -> PathBuf {
    let suffix = language
        .map(Language::default_suffix)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(FALLBACK_SUFFIX);
    work_dir.join(format!("analysis-{}{}", Uuid::new_v4(), suffix))
}

/// Analyze `content` as a file of the given language.
pub async fn analyze_snippet(
    bridge: &EngineBridge,
    work_dir: &Path,
    content: &str,
    language: Option<Language>,
    timeout: Duration,
) -> Result<AnalysisResult, EngineError> {
    tokio::fs::create_dir_all(work_dir).await?;
    let path = snippet_path(work_dir, language);
    tokio::fs::write(&path, content).await?;
    debug!(path = %path.display(), "Wrote snippet for analysis");

    let result = analyze_written(
        bridge,
        &path,
        content,
        language.unwrap_or(DEFAULT_LANGUAGE),
        timeout,
    )
    .await;

    if let Err(e) = tokio::fs::remove_file(&path).await {
        warn!(path = %path.display(), error = %e, "Failed to delete snippet file");
    }
    result
}

async fn analyze_written(
    bridge: &EngineBridge,
    path: &Path,
    content: &str,
    language: Language,
    timeout: Duration,
) -> Result<AnalysisResult, EngineError> {
    let path = tokio::fs::canonicalize(path).await?;
    let registration = FileRegistration::new(path, PROJECT_ID, content, Some(language))?;
    let uri = registration.uri.clone();

    bridge.add_file(registration);
    let result = bridge
        .analyze(AnalysisSession::new(vec![uri.clone()]))
        .with_timeout(timeout)
        .await;
    bridge.remove_file(uri);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_path_suffix() {
        let dir = Path::new("/work");
        let py = snippet_path(dir, Some(Language::Python));
        let name = py.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("analysis-"));
        assert!(name.ends_with(".py"));

        let plain = snippet_path(dir, None);
        assert!(plain.to_str().unwrap().ends_with(".txt"));
        assert_ne!(snippet_path(dir, None), plain);
    }
}
