//! Upload-completed notifications.
//!
//! When an object lands in durable storage, every subscribed
//! [`UploadListener`] is invoked in subscription order. A listener failure is
//! logged and does not prevent later listeners from running or fail the
//! upload that triggered the notification.

use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::UploadRecord;

/// Error type returned by listeners.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Receives a callback after an upload completes.
#[async_trait::async_trait]
pub trait UploadListener: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Called once per completed upload.
    async fn on_uploaded(&self, upload: &UploadRecord) -> Result<(), ListenerError>;
}

/// Ordered subscription list of [`UploadListener`]s.
#[derive(Clone, Default)]
pub struct UploadNotifier {
    listeners: Arc<RwLock<Vec<Arc<dyn UploadListener>>>>,
}

impl UploadNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener to the subscription list.
    pub fn subscribe(&self, listener: Arc<dyn UploadListener>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        listeners.push(listener);
    }

    /// Number of subscribed listeners.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no listener is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every listener in order. Returns how many succeeded.
    pub async fn notify(&self, upload: &UploadRecord) -> usize {
        let mut ok = 0;
        for listener in self.snapshot() {
            match listener.on_uploaded(upload).await {
                Ok(()) => ok += 1,
                Err(e) => {
                    warn!(
                        listener = listener.name(),
                        hash = %upload.hash,
                        error = %e,
                        "upload listener failed"
                    );
                }
            }
        }
        ok
    }

    fn snapshot(&self) -> Vec<Arc<dyn UploadListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
