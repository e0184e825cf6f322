//! Error types for the dispatcher
//!
//! Each I/O seam has its own error enum. [`EvaluationError`] is what a single
//! alert evaluation can fail with; the evaluator logs it and moves on to the
//! next alert.

use thiserror::Error;

/// Failures of the key-value cache store
#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of the event store read path
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("event store query failed: {0}")]
    Query(String),
}

#[derive(Debug, Error)]
pub enum SchemaCacheError {
    #[error(transparent)]
    Store(#[from] CacheStoreError),

    #[error(transparent)]
    Source(#[from] EventStoreError),

    #[error("cannot decode cached property type mappings: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook {webhook_id} not found")]
    UnknownWebhook { webhook_id: String },

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[derive(Debug, Error)]
pub enum AlertStoreError {
    #[error("alert {0} not found")]
    AlertNotFound(String),

    #[error("history for alert {alert_id} at {created_at} already exists")]
    DuplicateHistory {
        alert_id: String,
        created_at: chrono::DateTime<chrono::Utc>,
    },
}

/// Why one alert could not be evaluated on a tick
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    EventStore(#[from] EventStoreError),

    #[error(transparent)]
    AlertStore(#[from] AlertStoreError),

    #[error("group-by property {0} does not exist")]
    UnknownGroupBy(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = SchemaCacheError::from(CacheStoreError::Unavailable("connection refused".to_string()));
        assert_eq!(err.to_string(), "cache store unavailable: connection refused");

        let err = EvaluationError::UnknownGroupBy("userId".to_string());
        assert_eq!(err.to_string(), "group-by property userId does not exist");

        let err = NotifyError::UnknownWebhook {
            webhook_id: String::new(),
        };
        assert_eq!(err.to_string(), "webhook  not found");
    }
}
