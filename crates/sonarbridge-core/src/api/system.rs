//! `api/system/*` endpoints.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;

use super::{ApiError, ServerApiHelper, parse_json};

pub const HEALTH_PATH: &str = "/api/system/health";
pub const PING_PATH: &str = "/api/system/ping";
pub const STATUS_PATH: &str = "/api/system/status";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusResponse {
    pub id: String,
    pub version: String,
    pub status: String,
}

impl StatusResponse {
    pub fn parsed_version(&self) -> Result<Version, ApiError> {
        Version::parse(&self.version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthCause {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthNode {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub host: String,
    pub port: u16,
    pub started_at: String,
    pub health: String,
    #[serde(default)]
    pub causes: Vec<HealthCause>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthResponse {
    pub health: String,
    #[serde(default)]
    pub causes: Vec<HealthCause>,
    #[serde(default)]
    pub nodes: Vec<HealthNode>,
}

/// Server liveness and version.
pub struct SystemApi {
    helper: ServerApiHelper,
}

impl SystemApi {
    pub fn new(helper: ServerApiHelper) -> Self {
        Self { helper }
    }

    /// `"pong"` when the server is up. Sent without credentials.
    pub async fn ping(&self) -> Result<String, ApiError> {
        let response = self.helper.get_anonymous_async(PING_PATH).await?;
        Ok(response.body_as_str().to_string())
    }

    /// Sent without credentials.
    pub async fn status(&self) -> Result<StatusResponse, ApiError> {
        parse_json(self.helper.get_anonymous_async(STATUS_PATH).await?)
    }

    pub async fn health(&self) -> Result<HealthResponse, ApiError> {
        parse_json(self.helper.get_async(HEALTH_PATH).await?)
    }

    pub fn ping_blocking(&self) -> Result<String, ApiError> {
        let response = self.helper.get_anonymous(PING_PATH)?;
        Ok(response.body_as_str().to_string())
    }

    pub fn status_blocking(&self) -> Result<StatusResponse, ApiError> {
        parse_json(self.helper.get_anonymous(STATUS_PATH)?)
    }

    pub fn health_blocking(&self) -> Result<HealthResponse, ApiError> {
        parse_json(self.helper.get(HEALTH_PATH)?)
    }
}

/// A dotted server version such as `10.7.0.96327` or `2025.1-SNAPSHOT`.
///
/// Anything after the first `-` is a qualifier and ignored in comparisons.
#[derive(Debug, Clone)]
pub struct Version {
    name: String,
    numbers: Vec<u32>,
}

impl Version {
    pub fn parse(version: &str) -> Result<Self, ApiError> {
        let name = version.trim().to_string();
        let without_qualifier = name.split('-').next().unwrap_or_default();
        let numbers = without_qualifier
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| ApiError::Parse(format!("invalid version {name:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { name, numbers })
    }

    /// Whether this version is at least `min`. Missing components count as 0.
    pub fn satisfies_min_requirement(&self, min: &Version) -> bool {
        self.compare_numbers(min) != Ordering::Less
    }

    fn compare_numbers(&self, other: &Version) -> Ordering {
        let len = self.numbers.len().max(other.numbers.len());
        (0..len)
            .map(|i| {
                let a = self.numbers.get(i).copied().unwrap_or(0);
                let b = other.numbers.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.compare_numbers(other) == Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
