//! Error types for the CCTNS copilot.
//!
//! `GatewayError` is the closed set of failures the query gateway reports.
//! `CopilotError` wraps it together with the failures of the surrounding
//! application (configuration, I/O, report rendering).

use thiserror::Error;

/// Failures reported by the query gateway.
///
/// Every engine-specific error is converted into one of these variants at the
/// gateway boundary, so callers can branch on the variant without knowing
/// which database driver produced it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Credentials are missing or still set to placeholder values; no
    /// connection attempt was made.
    #[error("Database not configured: {0}")]
    NotConfigured(String),

    /// The engine rejected the credentials or locator, or the transport could
    /// not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Execution was attempted without a live connection.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The statement failed the read-only gate.
    #[error("Query rejected: {0}")]
    PolicyRejected(String),

    /// The engine accepted the statement but reported an error.
    #[error("Database error: {message}{}", code_suffix(.code))]
    EngineFailure {
        /// Engine error code (SQLSTATE or driver code), when one was reported.
        code: Option<String>,
        /// Engine error message.
        message: String,
    },

    /// Any other failure during execution.
    #[error("Unexpected failure: {0}")]
    UnexpectedFailure(String),
}

fn code_suffix(code: &Option<String>) -> String {
    match code {
        Some(code) => format!(" (code: {code})"),
        None => String::new(),
    }
}

impl GatewayError {
    /// Creates a not-configured error with the given cause.
    pub fn not_configured(msg: impl Into<String>) -> Self {
        Self::NotConfigured(msg.into())
    }

    /// Creates a connection error with the given cause.
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Creates a not-connected error with the given cause.
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    /// Creates a policy rejection with the given cause.
    pub fn policy_rejected(msg: impl Into<String>) -> Self {
        Self::PolicyRejected(msg.into())
    }

    /// Creates an engine failure from an engine code and message.
    pub fn engine_failure(code: Option<String>, message: impl Into<String>) -> Self {
        Self::EngineFailure {
            code,
            message: message.into(),
        }
    }

    /// Creates an unexpected failure with the given cause.
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::UnexpectedFailure(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotConfigured(_) => "Not Configured",
            Self::ConnectionFailed(_) => "Connection Failed",
            Self::NotConnected(_) => "Not Connected",
            Self::PolicyRejected(_) => "Policy Rejected",
            Self::EngineFailure { .. } => "Engine Failure",
            Self::UnexpectedFailure(_) => "Unexpected Failure",
        }
    }

    /// Returns true if the gateway keeps its connection after this error.
    pub fn leaves_connection_usable(&self) -> bool {
        matches!(
            self,
            Self::PolicyRejected(_) | Self::EngineFailure { .. } | Self::UnexpectedFailure(_)
        )
    }
}

/// Application-level error type.
#[derive(Error, Debug)]
pub enum CopilotError {
    /// Configuration errors (invalid config file, bad arguments, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A result table could not be rendered.
    #[error("Report error: {0}")]
    Report(String),

    /// The query gateway reported a failure.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl CopilotError {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a report error with the given message.
    pub fn report(msg: impl Into<String>) -> Self {
        Self::Report(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Configuration Error",
            Self::Io(_) => "I/O Error",
            Self::Report(_) => "Report Error",
            Self::Gateway(e) => e.category(),
        }
    }
}

/// Result type alias using CopilotError.
pub type Result<T> = std::result::Result<T, CopilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_failure_display_with_code() {
        let err = GatewayError::engine_failure(
            Some("42P01".to_string()),
            "relation \"fir_records\" does not exist",
        );
        assert_eq!(
            err.to_string(),
            "Database error: relation \"fir_records\" does not exist (code: 42P01)"
        );
        assert_eq!(err.category(), "Engine Failure");
    }

    #[test]
    fn test_engine_failure_display_without_code() {
        let err = GatewayError::engine_failure(None, "no such table: fir_records");
        assert_eq!(err.to_string(), "Database error: no such table: fir_records");
    }

    #[test]
    fn test_policy_rejected_display() {
        let err = GatewayError::policy_rejected("DROP statements are not allowed");
        assert_eq!(
            err.to_string(),
            "Query rejected: DROP statements are not allowed"
        );
        assert_eq!(err.category(), "Policy Rejected");
    }

    #[test]
    fn test_not_configured_display() {
        let err = GatewayError::not_configured("CCTNS_DB_USER is not set");
        assert_eq!(
            err.to_string(),
            "Database not configured: CCTNS_DB_USER is not set"
        );
        assert_eq!(err.category(), "Not Configured");
    }

    #[test]
    fn test_connection_usable_after_execution_errors() {
        assert!(GatewayError::policy_rejected("x").leaves_connection_usable());
        assert!(GatewayError::engine_failure(None, "x").leaves_connection_usable());
        assert!(GatewayError::unexpected("x").leaves_connection_usable());
        assert!(!GatewayError::not_connected("x").leaves_connection_usable());
        assert!(!GatewayError::connection_failed("x").leaves_connection_usable());
        assert!(!GatewayError::not_configured("x").leaves_connection_usable());
    }

    #[test]
    fn test_copilot_error_wraps_gateway_category() {
        let err: CopilotError = GatewayError::not_connected("closed").into();
        assert_eq!(err.category(), "Not Connected");
        assert_eq!(err.to_string(), "Not connected: closed");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GatewayError>();
        assert_send_sync::<CopilotError>();
    }
}
