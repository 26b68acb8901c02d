//! A scripted in-process analysis engine.
//!
//! [`StubEngine`] answers the handshake, returns canned issues for every
//! analysis, and records every request and notification it receives so tests
//! can assert on what the bridge sent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use sonarbridge_core::BoxFuture;
use sonarbridge_core::engine::protocol::{AnalysisResult, LogLevel, RawIssue, method};
use sonarbridge_core::engine::{EnginePeer, EngineService, ResponseError};
use tokio::sync::Notify;

/// How the stub answers `analysis/analyzeFilesAndTrack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    /// Return the canned issues.
    Issues,
    /// Never answer.
    Hang,
    /// Answer with an internal error.
    Fail,
}

/// A request or notification as received.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub method: String,
    pub params: Value,
}

#[derive(Default)]
struct Journal {
    requests: Vec<Recorded>,
    notifications: Vec<Recorded>,
}

pub struct StubEngine {
    issues: Vec<RawIssue>,
    answer_initialize: bool,
    analysis: AnalysisMode,
    log_on_initialize: Option<String>,
    journal: Mutex<Journal>,
    changed: Notify,
    peer: Mutex<Option<EnginePeer>>,
}

impl StubEngine {
    /// A stub that completes the handshake and reports no issues.
    pub fn new() -> Self {
        Self {
            issues: Vec::new(),
            answer_initialize: true,
            analysis: AnalysisMode::Issues,
            log_on_initialize: None,
            journal: Mutex::new(Journal::default()),
            changed: Notify::new(),
            peer: Mutex::new(None),
        }
    }

    pub fn with_issues(mut self, issues: Vec<RawIssue>) -> Self {
        self.issues = issues;
        self
    }

    /// Never answer `initialize`.
    pub fn never_initialize(mut self) -> Self {
        self.answer_initialize = false;
        self
    }

    pub fn hang_analysis(mut self) -> Self {
        self.analysis = AnalysisMode::Hang;
        self
    }

    pub fn fail_analysis(mut self) -> Self {
        self.analysis = AnalysisMode::Fail;
        self
    }

    /// Push a `log` notification to the client while handling `initialize`.
    pub fn log_on_initialize(mut self, message: &str) -> Self {
        self.log_on_initialize = Some(message.to_string());
        self
    }

    pub fn into_service(self) -> (Arc<Self>, Arc<dyn EngineService>) {
        let stub = Arc::new(self);
        let service: Arc<dyn EngineService> = stub.clone();
        (stub, service)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.journal.lock().unwrap().requests.clone()
    }

    pub fn notifications(&self) -> Vec<Recorded> {
        self.journal.lock().unwrap().notifications.clone()
    }

    pub fn requests_named(&self, name: &str) -> Vec<Value> {
        named(&self.requests(), name)
    }

    pub fn notifications_named(&self, name: &str) -> Vec<Value> {
        named(&self.notifications(), name)
    }

    /// Wait until at least `count` requests named `name` have arrived, or
    /// `timeout` elapses. Returns whatever was received.
    pub async fn wait_for_requests(&self, name: &str, count: usize, timeout: Duration) -> Vec<Value> {
        self.wait_until(timeout, || {
            let found = self.requests_named(name);
            (found.len() >= count).then_some(found)
        })
        .await
        .unwrap_or_else(|| self.requests_named(name))
    }

    /// Wait until at least `count` notifications named `name` have arrived,
    /// or `timeout` elapses. Returns whatever was received.
    pub async fn wait_for_notifications(
        &self,
        name: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<Value> {
        self.wait_until(timeout, || {
            let found = self.notifications_named(name);
            (found.len() >= count).then_some(found)
        })
        .await
        .unwrap_or_else(|| self.notifications_named(name))
    }

    async fn wait_until<T>(&self, timeout: Duration, mut check: impl FnMut() -> Option<T>) -> Option<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let changed = self.changed.notified();
            if let Some(found) = check() {
                return Some(found);
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return check();
            }
        }
    }

    fn record_request(&self, method: &str, params: &Value) {
        self.journal.lock().unwrap().requests.push(Recorded {
            method: method.to_string(),
            params: params.clone(),
        });
        self.changed.notify_waiters();
    }

    fn analysis_result(&self) -> Result<Value, ResponseError> {
        let result = AnalysisResult {
            failed_analysis_files: Vec::new(),
            raw_issues: self.issues.clone(),
        };
        serde_json::to_value(result).map_err(|e| ResponseError::internal(e.to_string()))
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn named(records: &[Recorded], name: &str) -> Vec<Value> {
    records
        .iter()
        .filter(|r| r.method == name)
        .map(|r| r.params.clone())
        .collect()
}

impl EngineService for StubEngine {
    fn on_connect(&self, peer: EnginePeer) {
        *self.peer.lock().unwrap() = Some(peer);
    }

    fn handle_request(&self, name: &str, params: Value) -> BoxFuture<'_, Result<Value, ResponseError>> {
        self.record_request(name, &params);
        let name = name.to_string();
        Box::pin(async move {
            match name.as_str() {
                method::INITIALIZE => {
                    if !self.answer_initialize {
                        return std::future::pending().await;
                    }
                    if let Some(message) = &self.log_on_initialize {
                        let peer = self.peer.lock().unwrap().clone();
                        if let Some(peer) = peer {
                            let _ = peer.log(LogLevel::Info, message.clone());
                        }
                    }
                    Ok(json!({}))
                }
                method::ANALYZE_FILES_AND_TRACK => match self.analysis {
                    AnalysisMode::Issues => self.analysis_result(),
                    AnalysisMode::Hang => std::future::pending().await,
                    AnalysisMode::Fail => Err(ResponseError::internal("analysis failed")),
                },
                method::SHUTDOWN => Ok(Value::Null),
                other => Err(ResponseError::method_not_found(other)),
            }
        })
    }

    fn handle_notification(&self, name: &str, params: Value) {
        self.journal.lock().unwrap().notifications.push(Recorded {
            method: name.to_string(),
            params,
        });
        self.changed.notify_waiters();
    }
}

/// A minimal raw issue for canned results.
pub fn sample_issue(rule_key: &str, message: &str) -> RawIssue {
    RawIssue {
        rule_key: rule_key.to_string(),
        primary_message: message.to_string(),
        severity: Some("MAJOR".to_string()),
        clean_code_attribute: None,
        impacts: Vec::new(),
        text_range: None,
        quick_fixes: Vec::new(),
    }
}
