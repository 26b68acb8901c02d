//! Build-time metadata embedded by the build script.
//!
//! Provides version, git commit hash, and build timestamp. The version also
//! feeds the default HTTP User-Agent and the engine handshake identity.

/// Product name reported to the engine and to the remote server.
pub const APP_NAME: &str = "SonarQube MCP Server";

/// The git commit hash at build time (short form).
pub const GIT_HASH: &str = env!("SONARBRIDGE_GIT_HASH");

/// The build timestamp as a Unix epoch string.
pub const BUILD_TIMESTAMP: &str = env!("SONARBRIDGE_BUILD_TIMESTAMP");

/// The build profile (`debug` or `release`).
pub const BUILD_PROFILE: &str = env!("SONARBRIDGE_BUILD_PROFILE");

/// The crate version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Return a formatted version string including git hash and profile.
///
/// Example: `"0.1.0 (abc1234, debug)"`
pub fn version_string() -> String {
    format!("{VERSION} ({GIT_HASH}, {BUILD_PROFILE})")
}

/// The default User-Agent: `"<app name> <version>"`.
pub fn default_user_agent() -> String {
    format!("{APP_NAME} {VERSION}")
}
