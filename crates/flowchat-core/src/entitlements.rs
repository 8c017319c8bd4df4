//! Quota and entitlement gate
//!
//! Resolves a tenant's plan entitlements and current usage to admit or deny
//! operations. Lookups are cached briefly; any write to the grant graph
//! invalidates the tenant's cache entry.

use chrono::{Datelike, TimeZone, Utc};
use flowchat_common::types::{Entitlement, TenantId};
use flowchat_common::{Error, Result};
use flowchat_storage::db::DatabasePool;
use flowchat_storage::repository::{
    CampaignRepository, EntitlementRepository, InstanceRepository,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Metric names
pub const METRIC_INSTANCES: &str = "instances";
pub const METRIC_CAMPAIGNS_PER_MONTH: &str = "campaigns_per_month";

const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct CachedLimits {
    limits: HashMap<String, i64>,
    fetched_at: Instant,
}

/// Entitlement gate
pub struct EntitlementGate {
    entitlements: EntitlementRepository,
    instances: InstanceRepository,
    campaigns: CampaignRepository,
    cache: Arc<RwLock<HashMap<TenantId, CachedLimits>>>,
}

impl EntitlementGate {
    /// Create a new entitlement gate
    pub fn new(db_pool: &DatabasePool) -> Self {
        let pool = db_pool.pool().clone();
        Self {
            entitlements: EntitlementRepository::new(pool.clone()),
            instances: InstanceRepository::new(pool.clone()),
            campaigns: CampaignRepository::new(pool),
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Resolve `(tenant, metric)` into current usage and the granted limit
    pub async fn check(&self, tenant_id: TenantId, metric: &str) -> Result<Entitlement> {
        let limits = self.limits_for(tenant_id).await?;
        let limit = limits.get(metric).copied().unwrap_or(0);
        let current = self.current_usage(tenant_id, metric).await?;

        Ok(Entitlement {
            metric: metric.to_string(),
            current,
            limit,
            allowed: current < limit,
        })
    }

    /// Like [`check`], but returns the denial as an error for call sites
    /// that gate an operation.
    pub async fn require(&self, tenant_id: TenantId, metric: &str) -> Result<Entitlement> {
        let entitlement = self.check(tenant_id, metric).await?;
        if !entitlement.allowed {
            return Err(Error::EntitlementDenied {
                metric: entitlement.metric.clone(),
                current: entitlement.current,
                limit: entitlement.limit,
            });
        }
        Ok(entitlement)
    }

    /// All resolved entitlements for a tenant (the limits endpoint)
    pub async fn resolve_all(&self, tenant_id: TenantId) -> Result<Vec<Entitlement>> {
        let limits = self.limits_for(tenant_id).await?;
        let mut out = Vec::with_capacity(limits.len());
        for (metric, limit) in limits {
            let current = self.current_usage(tenant_id, &metric).await?;
            out.push(Entitlement {
                allowed: current < limit,
                metric,
                current,
                limit,
            });
        }
        out.sort_by(|a, b| a.metric.cmp(&b.metric));
        Ok(out)
    }

    /// Drop the cached limits for a tenant after a grant change
    pub async fn invalidate(&self, tenant_id: TenantId) {
        self.cache.write().await.remove(&tenant_id);
        debug!(%tenant_id, "Entitlement cache invalidated");
    }

    async fn limits_for(&self, tenant_id: TenantId) -> Result<HashMap<String, i64>> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&tenant_id) {
                if entry.fetched_at.elapsed() < CACHE_TTL {
                    return Ok(entry.limits.clone());
                }
            }
        }

        let rows = self
            .entitlements
            .limits_for_tenant(tenant_id)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        let limits: HashMap<String, i64> =
            rows.into_iter().map(|r| (r.metric, r.limit_value)).collect();

        self.cache.write().await.insert(
            tenant_id,
            CachedLimits {
                limits: limits.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(limits)
    }

    async fn current_usage(&self, tenant_id: TenantId, metric: &str) -> Result<i64> {
        match metric {
            METRIC_INSTANCES => self
                .instances
                .count_by_tenant(tenant_id)
                .await
                .map_err(|e| Error::Database(e.to_string())),
            METRIC_CAMPAIGNS_PER_MONTH => {
                let now = Utc::now();
                let month_start = Utc
                    .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                    .single()
                    .unwrap_or(now);
                let next_month = if now.month() == 12 {
                    Utc.with_ymd_and_hms(now.year() + 1, 1, 1, 0, 0, 0)
                } else {
                    Utc.with_ymd_and_hms(now.year(), now.month() + 1, 1, 0, 0, 0)
                }
                .single()
                .unwrap_or(now);

                self.campaigns
                    .count_started_between(tenant_id, month_start, next_month)
                    .await
                    .map_err(|e| Error::Database(e.to_string()))
            }
            _ => Ok(0),
        }
    }
}
