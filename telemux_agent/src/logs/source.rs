//! Capability surface of the upstream log producer.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SourceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamStatus {
    Connected,
    Disconnected { reason: String },
}

/// Callbacks registered by the stream that owns a subscription.
///
/// Called from the source's own tasks, possibly concurrently with
/// subscribe/unsubscribe. Lines for one subscription arrive in order.
pub trait LogHandler: Send + Sync {
    fn on_line(&self, line: String);

    fn on_error(&self, message: String);

    fn on_status(&self, status: UpstreamStatus);
}

/// A live follow; releasing it stops the upstream producer.
///
/// `release` must not block.
pub trait UpstreamSubscription: Send {
    fn release(self: Box<Self>);
}

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Starts following `instance`.
    ///
    /// Must return promptly and must not invoke `handler` before returning.
    fn follow(
        &self,
        instance: &str,
        handler: Arc<dyn LogHandler>,
    ) -> Result<Box<dyn UpstreamSubscription>, SourceError>;

    /// One-shot read of the instance's current logs.
    async fn dump(&self, instance: &str) -> Result<String, SourceError>;
}
