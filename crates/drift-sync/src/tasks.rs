//! Job queue tasks driving the pipeline stages.

use std::sync::{Arc, Weak};

use drift_jobs::{JobError, Task, decode_args};
use drift_types::{ListenerError, UploadListener, UploadObjectArgs, UploadRecord, VerifyObjectArgs};

use crate::node::{SCAN_TASK, SyncNode, UPLOAD_TASK, VERIFY_TASK};

/// Runs [`SyncNode::verify_object`].
pub struct VerifyTask(pub Arc<SyncNode>);

#[async_trait::async_trait]
impl Task for VerifyTask {
    fn name(&self) -> &str {
        VERIFY_TASK
    }

    async fn run(&self, args: &[u8]) -> Result<(), JobError> {
        let args: VerifyObjectArgs = decode_args(args)?;
        self.0.verify_object(args).await.map_err(JobError::failed)
    }
}

/// Runs [`SyncNode::upload_object`].
pub struct UploadTask(pub Arc<SyncNode>);

#[async_trait::async_trait]
impl Task for UploadTask {
    fn name(&self) -> &str {
        UPLOAD_TASK
    }

    async fn run(&self, args: &[u8]) -> Result<(), JobError> {
        let args: UploadObjectArgs = decode_args(args)?;
        self.0
            .upload_object(args)
            .await
            .map(|_| ())
            .map_err(JobError::failed)
    }
}

/// Runs [`SyncNode::scan_objects`].
pub struct ScanTask(pub Arc<SyncNode>);

#[async_trait::async_trait]
impl Task for ScanTask {
    fn name(&self) -> &str {
        SCAN_TASK
    }

    async fn run(&self, _args: &[u8]) -> Result<(), JobError> {
        self.0
            .scan_objects()
            .await
            .map(|_| ())
            .map_err(JobError::failed)
    }
}

/// Publishes every completed upload to the log.
///
/// Holds the node weakly: the node owns the notifier this listener is
/// subscribed to.
pub struct UpdateListener(pub Weak<SyncNode>);

#[async_trait::async_trait]
impl UploadListener for UpdateListener {
    fn name(&self) -> &str {
        "sync.update"
    }

    async fn on_uploaded(&self, upload: &UploadRecord) -> Result<(), ListenerError> {
        let Some(node) = self.0.upgrade() else {
            return Ok(());
        };
        node.update(upload).await?;
        Ok(())
    }
}
