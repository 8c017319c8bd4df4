//! Media worker
//!
//! Durable consumer for inbound attachments: download from the gateway's
//! URL, keep a local cache copy (valid for the cache TTL), upload to the
//! permanent object store and write the result back onto the attachment.
//! The periodic sweep garbage-collects expired cache files and purges old
//! dedup fingerprints.

use crate::bus::{DurableQueue, JobEnvelope, JobKind, QUEUE_PROCESS_MEDIA};
use crate::metrics::Metrics;
use chrono::{Duration as ChronoDuration, Utc};
use flowchat_storage::db::DatabasePool;
use flowchat_storage::file::{
    attachment_cache_path, attachment_object_key, FileStorage, LocalStorage, ObjectStore,
};
use flowchat_storage::models::{Job, MessageAttachment};
use flowchat_storage::repository::{AttachmentRepository, FingerprintRepository, MessageRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Dedup window shared with the ingestor
const DEDUP_WINDOW_HOURS: i64 = 48;

/// Media worker
#[derive(Clone)]
pub struct MediaWorker {
    durable: DurableQueue,
    attachments: AttachmentRepository,
    messages: MessageRepository,
    fingerprints: FingerprintRepository,
    cache: Arc<LocalStorage>,
    object_store: Option<Arc<ObjectStore>>,
    http: reqwest::Client,
    metrics: Metrics,
    poll_interval: Duration,
    sweep_interval: Duration,
    batch_size: i64,
    cache_ttl_days: i64,
    download_timeout: Duration,
}

impl MediaWorker {
    /// Create a new media worker
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: &DatabasePool,
        durable: DurableQueue,
        cache: Arc<LocalStorage>,
        object_store: Option<Arc<ObjectStore>>,
        metrics: Metrics,
        poll_interval_secs: u64,
        sweep_interval_secs: u64,
        batch_size: i64,
        cache_ttl_days: i64,
        download_timeout_secs: u64,
    ) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            durable,
            attachments: AttachmentRepository::new(pool.clone()),
            messages: MessageRepository::new(pool.clone()),
            fingerprints: FingerprintRepository::new(pool),
            cache,
            object_store,
            http: reqwest::Client::new(),
            metrics,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
            sweep_interval: Duration::from_secs(sweep_interval_secs.max(60)),
            batch_size,
            cache_ttl_days,
            download_timeout: Duration::from_secs(download_timeout_secs),
        }
    }

    /// Run the worker until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        let mut sweeper = interval(self.sweep_interval);

        info!("Media worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.drain().await {
                        error!(error = %e, "Error draining media queue");
                    }
                }
                _ = sweeper.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "Media sweep failed");
                    }
                }
            }
        }

        info!("Media worker stopped");
    }

    async fn drain(&self) -> Result<(), sqlx::Error> {
        let jobs = self
            .durable
            .claim_ready(QUEUE_PROCESS_MEDIA, self.batch_size)
            .await?;

        for job in jobs {
            self.process(job).await;
        }
        Ok(())
    }

    async fn process(&self, job: Job) {
        let envelope = match JobEnvelope::decode(&job.payload) {
            Ok(envelope) => envelope,
            Err(reason) => {
                warn!(job_id = %job.id, %reason, "Unusable media job parked");
                let _ = self.durable.fail_permanent(job.id, &reason).await;
                return;
            }
        };

        let JobKind::ProcessMedia { attachment_id } = envelope.kind else {
            let _ = self
                .durable
                .fail_permanent(job.id, "Wrong job kind on media queue")
                .await;
            return;
        };

        let attachment = match self.attachments.get(attachment_id).await {
            Ok(Some(a)) => a,
            Ok(None) => {
                let _ = self
                    .durable
                    .fail_permanent(job.id, "Attachment vanished")
                    .await;
                return;
            }
            Err(e) => {
                let _ = self.durable.fail(&job, &e.to_string()).await;
                return;
            }
        };

        // idempotency: an already-uploaded attachment means replay
        if attachment.storage_url.is_some() {
            debug!(%attachment_id, "Attachment already processed");
            let _ = self.durable.complete(job.id).await;
            return;
        }

        match self.process_attachment(&attachment).await {
            Ok(()) => {
                self.metrics.media_processed.inc();
                let _ = self.durable.complete(job.id).await;
            }
            Err(e) => {
                warn!(%attachment_id, error = %e, "Media processing failed");
                let _ = self.durable.fail(&job, &e.to_string()).await;
            }
        }
    }

    async fn process_attachment(&self, attachment: &MessageAttachment) -> anyhow::Result<()> {
        // download from the gateway's (expiring) URL
        let response = self
            .http
            .get(&attachment.remote_url)
            .timeout(self.download_timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("Media download failed with status {}", response.status());
        }
        let data = response.bytes().await?;

        let ext = attachment
            .mime_type
            .as_deref()
            .and_then(|m| mime_guess::get_mime_extensions_str(m))
            .and_then(|exts| exts.first())
            .copied()
            .unwrap_or("bin");

        let message = self
            .messages
            .get_by_tenant(attachment.tenant_id, attachment.message_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Message vanished for attachment"))?;

        // local cache copy, swept after the TTL
        let cache_rel = attachment_cache_path(
            attachment.tenant_id,
            message.conversation_id,
            attachment.id,
            ext,
        );
        let local_path = self.cache.store(&cache_rel, &data).await?;
        self.attachments
            .set_local_path(attachment.id, &local_path, self.cache_ttl_days)
            .await?;

        // permanent object store copy
        if let Some(store) = &self.object_store {
            let key = attachment_object_key(
                attachment.tenant_id,
                message.conversation_id,
                message.id,
                attachment.id,
                ext,
            );
            let url = store.store(&key, &data).await?;
            self.attachments.set_storage_url(attachment.id, &url).await?;
        }

        info!(
            attachment_id = %attachment.id,
            bytes = data.len(),
            "Attachment processed"
        );
        Ok(())
    }

    /// Delete expired cache files and purge old fingerprints
    pub async fn sweep(&self) -> Result<(), sqlx::Error> {
        let expired = self.attachments.list_expired(Utc::now(), 500).await?;
        let count = expired.len();

        for attachment in expired {
            if let Some(local_path) = &attachment.local_path {
                if let Err(e) = self.cache.delete_absolute(local_path).await {
                    warn!(attachment_id = %attachment.id, error = %e, "Cache delete failed");
                    continue;
                }
            }
            self.attachments.clear_local_path(attachment.id).await?;
        }

        let purged = self
            .fingerprints
            .purge_older_than(ChronoDuration::hours(DEDUP_WINDOW_HOURS))
            .await?;

        if count > 0 || purged > 0 {
            info!(cache_files = count, fingerprints = purged, "Sweep completed");
        }
        Ok(())
    }
}
