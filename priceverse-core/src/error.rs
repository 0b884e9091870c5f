//! Error taxonomy
//!
//! Every user-visible failure carries a stable code identifier. Validation
//! errors are returned, never panicked; storage errors are wrapped with the
//! original code preserved; anything internal is rewritten to
//! `INTERNAL_ERROR` before it crosses the RPC boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, user-visible error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 1xxx price
    PairNotFound,
    PriceUnavailable,
    PriceStale,
    // 2xxx chart
    ChartDataNotFound,
    InvalidTimeRange,
    InvalidInterval,
    // 3xxx exchange
    ExchangeDisconnected,
    ExchangeRateLimited,
    ExchangeNotSupported,
    // 4xxx validation
    InvalidPair,
    InvalidPeriod,
    InvalidDateFormat,
    InvalidParams,
    // 5xxx system
    DatabaseError,
    RedisError,
    InternalError,
    ServiceUnavailable,
    // 6xxx stream
    StreamAborted,
    StreamTimeout,
}

impl ErrorCode {
    /// Numeric code grouped by class
    pub fn numeric(&self) -> u16 {
        match self {
            ErrorCode::PairNotFound => 1001,
            ErrorCode::PriceUnavailable => 1002,
            ErrorCode::PriceStale => 1003,
            ErrorCode::ChartDataNotFound => 2001,
            ErrorCode::InvalidTimeRange => 2002,
            ErrorCode::InvalidInterval => 2003,
            ErrorCode::ExchangeDisconnected => 3001,
            ErrorCode::ExchangeRateLimited => 3002,
            ErrorCode::ExchangeNotSupported => 3003,
            ErrorCode::InvalidPair => 4001,
            ErrorCode::InvalidPeriod => 4002,
            ErrorCode::InvalidDateFormat => 4003,
            ErrorCode::InvalidParams => 4004,
            ErrorCode::DatabaseError => 5001,
            ErrorCode::RedisError => 5002,
            ErrorCode::InternalError => 5003,
            ErrorCode::ServiceUnavailable => 5004,
            ErrorCode::StreamAborted => 6001,
            ErrorCode::StreamTimeout => 6002,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::PairNotFound => "PAIR_NOT_FOUND",
            ErrorCode::PriceUnavailable => "PRICE_UNAVAILABLE",
            ErrorCode::PriceStale => "PRICE_STALE",
            ErrorCode::ChartDataNotFound => "CHART_DATA_NOT_FOUND",
            ErrorCode::InvalidTimeRange => "INVALID_TIME_RANGE",
            ErrorCode::InvalidInterval => "INVALID_INTERVAL",
            ErrorCode::ExchangeDisconnected => "EXCHANGE_DISCONNECTED",
            ErrorCode::ExchangeRateLimited => "EXCHANGE_RATE_LIMITED",
            ErrorCode::ExchangeNotSupported => "EXCHANGE_NOT_SUPPORTED",
            ErrorCode::InvalidPair => "INVALID_PAIR",
            ErrorCode::InvalidPeriod => "INVALID_PERIOD",
            ErrorCode::InvalidDateFormat => "INVALID_DATE_FORMAT",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::RedisError => "REDIS_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::StreamAborted => "STREAM_ABORTED",
            ErrorCode::StreamTimeout => "STREAM_TIMEOUT",
        }
    }

    /// Validation-class errors bubble to the RPC boundary unchanged
    pub fn is_validation(&self) -> bool {
        (4000..5000).contains(&self.numeric())
    }

    /// Transient storage-class errors eligible for local retry
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCode::DatabaseError | ErrorCode::RedisError)
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline-wide error value
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct CoreError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_pair(pair: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidPair, format!("unknown pair: {pair}"))
    }

    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, msg)
    }

    pub fn invalid_period(period: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::InvalidPeriod, format!("unknown period: {period}"))
    }

    pub fn invalid_date(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidDateFormat, msg)
    }

    pub fn invalid_time_range(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidTimeRange, msg)
    }

    pub fn price_unavailable(pair: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::PriceUnavailable,
            format!("no price available for {pair}"),
        )
    }

    pub fn chart_data_not_found(pair: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::ChartDataNotFound,
            format!("no chart data for {pair}"),
        )
    }

    pub fn database(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, msg)
    }

    pub fn redis(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::RedisError, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, msg)
    }

    /// Rewrite non-user-facing errors before they cross the RPC boundary.
    /// Validation and resource-class codes pass through; system internals
    /// are collapsed to `INTERNAL_ERROR` with details stripped.
    pub fn sanitized(self) -> Self {
        match self.code {
            ErrorCode::DatabaseError | ErrorCode::RedisError | ErrorCode::InternalError => {
                Self::new(ErrorCode::InternalError, "internal error")
            }
            _ => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_groups() {
        assert_eq!(ErrorCode::PairNotFound.numeric(), 1001);
        assert_eq!(ErrorCode::StreamTimeout.numeric(), 6002);
        assert!(ErrorCode::InvalidParams.is_validation());
        assert!(!ErrorCode::DatabaseError.is_validation());
        assert!(ErrorCode::DatabaseError.is_transient());
    }

    #[test]
    fn test_sanitize_strips_internals() {
        let err = CoreError::database("disk io error at /var/lib").sanitized();
        assert_eq!(err.code, ErrorCode::InternalError);
        assert_eq!(err.message, "internal error");
        assert!(err.details.is_none());

        let err = CoreError::invalid_params("missing from").sanitized();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert_eq!(err.message, "missing from");
    }

    #[test]
    fn test_code_serializes_as_identifier() {
        let json = serde_json::to_string(&ErrorCode::PairNotFound).unwrap();
        assert_eq!(json, "\"PAIR_NOT_FOUND\"");
    }
}
