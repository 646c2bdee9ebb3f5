//! [`SyncNode`]: the import, verify, upload, update and scan stages.
//!
//! Every stage is safe to re-run from scratch: stages are driven by the job
//! queue, which redelivers work after failures and restarts. Per hash, at
//! most one verify and one upload job are in flight, because both are keyed
//! by the hex content hash.

use std::sync::Arc;

use drift_jobs::JobQueue;
use drift_log::SyncLog;
use drift_meta::MetaStore;
use drift_store::{ObjectStore, StorageService};
use drift_types::{
    ContentHash, FileMeta, UploadNotifier, UploadObjectArgs, UploadRecord, VerifyObjectArgs,
};
use ed25519_dalek::VerifyingKey;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::protocol::ProtocolRegistry;
use crate::stream::RetryableStream;
use crate::verify::verify_download;

/// Bucket holding objects between verification and upload.
pub const STAGING_BUCKET: &str = "sync";

/// Task name of the verify stage.
pub const VERIFY_TASK: &str = "sync.verify_object";

/// Task name of the upload stage.
pub const UPLOAD_TASK: &str = "sync.upload_object";

/// Task name of the reconciliation scan.
pub const SCAN_TASK: &str = "sync.scan_objects";

/// Collaborators a [`SyncNode`] runs against.
pub struct SyncDeps {
    /// Shared log service.
    pub log: Arc<dyn SyncLog>,
    /// Bucket/object view of storage, including the staging bucket.
    pub objects: Arc<dyn ObjectStore>,
    /// Durable upload and proof service.
    pub storage: Arc<dyn StorageService>,
    /// Local completed uploads.
    pub meta: Arc<MetaStore>,
    /// Known sync protocols.
    pub protocols: ProtocolRegistry,
    /// Upload-completed listeners.
    pub notifier: UploadNotifier,
}

/// The sync pipeline of one node.
pub struct SyncNode {
    enabled: bool,
    log_key: VerifyingKey,
    log: Arc<dyn SyncLog>,
    objects: Arc<dyn ObjectStore>,
    storage: Arc<dyn StorageService>,
    meta: Arc<MetaStore>,
    protocols: ProtocolRegistry,
    notifier: UploadNotifier,
    jobs: JobQueue,
}

impl SyncNode {
    /// Create a node publishing as `log_key` and submitting to `jobs`.
    pub fn new(enabled: bool, log_key: VerifyingKey, deps: SyncDeps, jobs: JobQueue) -> Self {
        Self {
            enabled,
            log_key,
            log: deps.log,
            objects: deps.objects,
            storage: deps.storage,
            meta: deps.meta,
            protocols: deps.protocols,
            notifier: deps.notifier,
            jobs,
        }
    }

    /// Whether syncing is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// This node's public log key.
    pub fn log_key(&self) -> VerifyingKey {
        self.log_key
    }

    /// Registered protocols.
    pub fn protocols(&self) -> &ProtocolRegistry {
        &self.protocols
    }

    /// Upload-completed notifier.
    pub fn notifier(&self) -> &UploadNotifier {
        &self.notifier
    }

    /// Job queue the stages submit to.
    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    // ------------------------------------------------------------------
    // Import
    // ------------------------------------------------------------------

    /// Look `identifier` up in the log and queue verification of its
    /// available candidates on behalf of `requester`.
    ///
    /// Validation failures are returned to the caller and queue nothing.
    pub async fn import(&self, identifier: &str, requester: u64) -> Result<ContentHash, SyncError> {
        let protocol = self
            .protocols
            .for_identifier(identifier)
            .ok_or(SyncError::InvalidObject)?;
        let hash = protocol.hash_from_identifier(identifier)?;

        let candidates: Vec<FileMeta> = self
            .log
            .query(&[protocol.identifier(&hash)])
            .await?
            .into_iter()
            .filter(|meta| {
                let available = meta.is_available();
                if !available {
                    debug!(%hash, key = %meta.key, "skipping candidate with empty slab");
                }
                available
            })
            .collect();
        if candidates.is_empty() {
            return Err(SyncError::ObjectNotFound);
        }

        if self.meta.get_upload(&hash)?.is_some() {
            return Err(SyncError::AlreadyExists);
        }

        let count = candidates.len();
        let args = VerifyObjectArgs {
            hash,
            objects: candidates,
            requester,
        };
        let queued = self
            .jobs
            .create_job_if_not_exists(VERIFY_TASK, &args, &hash.to_hex())?;
        info!(%hash, protocol = protocol.name(), candidates = count, requester, queued, "import requested");
        Ok(hash)
    }

    // ------------------------------------------------------------------
    // Verify
    // ------------------------------------------------------------------

    /// Stage and proof-check candidates until one verifies, then queue its
    /// upload. Ends quietly if none verifies.
    pub async fn verify_object(&self, args: VerifyObjectArgs) -> Result<(), SyncError> {
        let hash = args.hash;
        self.objects
            .create_bucket_if_not_exists(STAGING_BUCKET)
            .await?;

        for meta in args.objects {
            if meta.hash != hash {
                warn!(%hash, candidate = %meta.hash, "candidate hash mismatch, skipping");
                continue;
            }
            let Some(protocol) = self.protocols.get(&meta.protocol) else {
                warn!(%hash, protocol = %meta.protocol, "candidate has unknown protocol, skipping");
                continue;
            };
            let name = protocol.encode_file_name(&hash);

            if let Err(e) = self
                .objects
                .import_object(STAGING_BUCKET, &name, &meta.layout())
                .await
            {
                warn!(%hash, key = %meta.key, error = %e, "failed to stage candidate");
                continue;
            }

            let download = self.objects.get_object(STAGING_BUCKET, &name).await?;
            if let Err(e) = verify_download(download.reader, &hash, meta.proof, meta.size).await {
                warn!(%hash, key = %meta.key, error = %e, "candidate failed verification");
                continue;
            }

            let upload = UploadObjectArgs {
                hash,
                protocol: meta.protocol,
                size: meta.size,
                requester: args.requester,
            };
            self.jobs
                .create_job_if_not_exists(UPLOAD_TASK, &upload, &hash.to_hex())?;
            info!(%hash, key = %meta.key, size = meta.size, "object verified, upload queued");
            return Ok(());
        }

        info!(%hash, "no candidate verified, import abandoned");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------

    /// Copy a verified object from staging into durable storage, record it
    /// and notify listeners.
    pub async fn upload_object(&self, args: UploadObjectArgs) -> Result<UploadRecord, SyncError> {
        let hash = args.hash;
        if let Some(existing) = self.meta.get_upload(&hash)? {
            debug!(%hash, protocol = %existing.protocol, "object already uploaded");
            return Ok(existing);
        }

        let protocol = self
            .protocols
            .get(&args.protocol)
            .ok_or_else(|| SyncError::UnknownProtocol(args.protocol.clone()))?;
        let name = protocol.encode_file_name(&hash);
        let storage_protocol = protocol.storage_protocol();

        let source = RetryableStream::open(self.objects.clone(), STAGING_BUCKET, &name).await?;
        let mut record = self
            .storage
            .upload_object(storage_protocol.as_ref(), Box::new(source), args.size)
            .await?;
        if record.hash != hash {
            return Err(SyncError::Verification(format!(
                "stored object hashes to {}, expected {hash}",
                record.hash
            )));
        }
        record.user_id = args.requester;

        self.meta.save_upload(&record, true)?;
        self.objects.delete_object(STAGING_BUCKET, &name).await?;
        info!(
            %hash,
            protocol = %record.protocol,
            size = record.size,
            user_id = record.user_id,
            "object uploaded"
        );

        self.notifier.notify(&record).await;
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Update and scan
    // ------------------------------------------------------------------

    /// Publish fresh metadata for a completed upload to the log.
    ///
    /// Objects with an empty slab are skipped without error. A no-op when
    /// syncing is disabled.
    pub async fn update(&self, upload: &UploadRecord) -> Result<(), SyncError> {
        if !self.enabled {
            return Ok(());
        }

        let protocol = self
            .protocols
            .for_storage(&upload.protocol)
            .ok_or_else(|| SyncError::UnknownProtocol(upload.protocol.clone()))?;
        let storage_protocol = protocol.storage_protocol();
        let name = storage_protocol.encode_file_name(&upload.hash);

        let layout = self
            .objects
            .object_layout(storage_protocol.name(), &name)
            .await?;
        if !layout.is_available() {
            debug!(hash = %upload.hash, key = %layout.key, "object has an empty slab, not publishing");
            return Ok(());
        }

        let proof = self
            .storage
            .download_proof(storage_protocol.as_ref(), &upload.hash)
            .await?;
        let meta = FileMeta::from_layout(upload.hash, protocol.name(), proof, layout);
        self.log.publish_update(meta).await?;
        debug!(hash = %upload.hash, protocol = protocol.name(), "published update");
        Ok(())
    }

    /// Republish every completed upload. Per-object failures are logged and
    /// the sweep continues. Returns how many were published.
    pub async fn scan_objects(&self) -> Result<usize, SyncError> {
        let uploads = self.meta.all_uploads()?;
        let total = uploads.len();
        let mut published = 0;
        for upload in &uploads {
            match self.update(upload).await {
                Ok(()) => published += 1,
                Err(e) => {
                    error!(hash = %upload.hash, error = %e, "failed to republish upload");
                }
            }
        }
        info!(total, published, "reconciliation scan finished");
        Ok(published)
    }
}
