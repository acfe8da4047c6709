use crate::config::{CacheBackend, Settings};
use anyhow::{Context, Result};
use auth_zanzibar::{
    AclService, DecisionCache, InMemoryDecisionCache, RedisDecisionCache, SledNamespaceRegistry,
    SledTupleStore, TupleStore,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Shared server state
#[derive(Clone)]
pub struct ZanzibarServer {
    /// Effective configuration
    pub settings: Arc<Settings>,
    /// ACL and namespace operations
    pub acl: Arc<AclService>,
    started_at: Instant,
}

impl ZanzibarServer {
    /// Open storage, connect the cache and wire up the ACL service
    pub async fn new(settings: Settings) -> Result<Self> {
        let db = if settings.storage.temporary {
            sled::Config::new()
                .temporary(true)
                .open()
                .context("Failed to open temporary database")?
        } else {
            sled::open(&settings.storage.path).with_context(|| {
                format!("Failed to open database at {}", settings.storage.path)
            })?
        };

        let store = Arc::new(SledTupleStore::from_db(&db)?);
        if settings.storage.migrate_reverse_index {
            let rebuilt = store.migrate_reverse_index().await?;
            info!(rebuilt, "Reverse index checked");
        }
        let registry = Arc::new(SledNamespaceRegistry::from_db(&db)?);

        let cache: Arc<dyn DecisionCache> = match settings.cache.backend {
            CacheBackend::Memory => Arc::new(
                InMemoryDecisionCache::new().with_max_entries(settings.cache.max_entries),
            ),
            CacheBackend::Redis => Arc::new(
                RedisDecisionCache::connect(&settings.cache.redis_url)
                    .await
                    .context("Failed to connect to Redis")?,
            ),
        };

        let acl = AclService::new(store, registry, cache)
            .with_check_config(settings.engine.check_config()?)
            .with_manage_policy(settings.engine.manage_policy()?)
            .with_cache_ttl(settings.cache_ttl())
            .with_listing_relation(settings.engine.listing_relation()?);

        info!(
            storage = if settings.storage.temporary { "temporary" } else { settings.storage.path.as_str() },
            cache = ?settings.cache.backend,
            "Authorization service initialised"
        );

        Ok(Self {
            settings: Arc::new(settings),
            acl: Arc::new(acl),
            started_at: Instant::now(),
        })
    }

    /// Seconds since the state was created
    pub fn uptime(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
