//! Profile picture worker
//!
//! Fast-lane consumer: fetches contact profile pictures from the gateway
//! and caches the URL. Losing these tasks across a restart is fine; the
//! next inbound message enqueues a fresh one.

use crate::bus::FastLane;
use crate::gateway::GatewayClient;
use flowchat_common::types::{InstanceId, PhoneNumber, TenantId};
use flowchat_storage::db::DatabasePool;
use flowchat_storage::repository::InstanceRepository;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fast-lane queue name
pub const QUEUE_PROFILE_PICTURES: &str = "profile_pictures";

/// Cached profile URL TTL
const PROFILE_CACHE_TTL_SECS: u64 = 24 * 3600;

/// A profile picture fetch task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilePictureTask {
    pub tenant_id: TenantId,
    pub instance_id: InstanceId,
    pub phone: String,
}

/// Profile picture worker
#[derive(Clone)]
pub struct ProfileWorker {
    fast: FastLane,
    gateway: GatewayClient,
    instances: InstanceRepository,
}

impl ProfileWorker {
    /// Create a new profile worker
    pub fn new(db_pool: &DatabasePool, fast: FastLane, gateway: GatewayClient) -> Self {
        Self {
            fast,
            gateway,
            instances: InstanceRepository::new(db_pool.pool().clone()),
        }
    }

    /// Run the worker until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!("Profile picture worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let task: Option<ProfilePictureTask> = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.fast.pop(QUEUE_PROFILE_PICTURES, 5.0) => match result {
                    Ok(task) => task,
                    Err(e) => {
                        warn!(error = %e, "Fast lane pop failed");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                },
            };

            let Some(task) = task else { continue };
            if let Err(e) = self.fetch(&task).await {
                debug!(phone = %task.phone, error = %e, "Profile fetch failed");
            }
        }

        info!("Profile picture worker stopped");
    }

    async fn fetch(&self, task: &ProfilePictureTask) -> anyhow::Result<()> {
        let Some(instance) = self.instances.get(task.instance_id).await? else {
            return Ok(());
        };
        let Some(phone) = PhoneNumber::parse(&task.phone) else {
            return Ok(());
        };

        let url = self.gateway.fetch_profile_picture(&instance, &phone).await?;
        if let Some(url) = url {
            let key = format!("profile:{}:{}", task.tenant_id, task.phone);
            self.fast.cache_set(&key, &url, PROFILE_CACHE_TTL_SECS).await?;
            debug!(phone = %task.phone, "Profile picture cached");
        }
        Ok(())
    }
}
