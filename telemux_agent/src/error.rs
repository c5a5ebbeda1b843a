//! Error types for the agent.
//!
//! None of these are fatal: collection failures fall back to stale values,
//! source failures are forwarded to subscribers, transport failures only
//! affect the one subscriber they happened on.

use std::time::Duration;
use thiserror::Error;

/// A single host counter read failed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SampleError {
    #[error("{metric} counter unavailable: {reason}")]
    Unavailable {
        metric: &'static str,
        reason: String,
    },

    /// The counter went backwards or produced a value we cannot use.
    #[error("{metric} counter produced an invalid reading")]
    Invalid { metric: &'static str },
}

impl SampleError {
    pub fn unavailable(metric: &'static str, reason: impl Into<String>) -> Self {
        SampleError::Unavailable {
            metric,
            reason: reason.into(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            SampleError::Unavailable { .. } => "sample_unavailable",
            SampleError::Invalid { .. } => "sample_invalid",
        }
    }
}

/// Failures of the upstream log source.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to start log follower for '{instance}': {reason}")]
    Spawn { instance: String, reason: String },

    #[error("log query for '{instance}' failed: {reason}")]
    Query { instance: String, reason: String },

    #[error("log query for '{instance}' timed out after {timeout:?}")]
    Timeout { instance: String, timeout: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub fn as_label(&self) -> &'static str {
        match self {
            SourceError::Spawn { .. } => "source_spawn",
            SourceError::Query { .. } => "source_query",
            SourceError::Timeout { .. } => "source_timeout",
            SourceError::Io(_) => "source_io",
        }
    }
}

/// Delivery to one subscriber failed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("subscriber '{0}' is not connected")]
    UnknownSubscriber(String),

    #[error("outbound queue full for subscriber '{0}'")]
    QueueFull(String),

    #[error("subscriber '{0}' disconnected")]
    Closed(String),

    #[error("failed to encode event: {0}")]
    Encode(String),
}

impl TransportError {
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::UnknownSubscriber(_) => "transport_unknown_subscriber",
            TransportError::QueueFull(_) => "transport_queue_full",
            TransportError::Closed(_) => "transport_closed",
            TransportError::Encode(_) => "transport_encode",
        }
    }
}

/// Bad configuration input (env or CLI).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("missing value for {0}")]
    MissingValue(String),

    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),

    #[error("{0}")]
    Help(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(
            SampleError::unavailable("cpu", "boom").as_label(),
            "sample_unavailable"
        );
        assert_eq!(
            TransportError::QueueFull("a".into()).as_label(),
            "transport_queue_full"
        );
        let err = SourceError::Timeout {
            instance: "srv1".into(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(err.as_label(), "source_timeout");
        assert!(err.to_string().contains("srv1"));
    }
}
