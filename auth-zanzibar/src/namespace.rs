use crate::{
    error::{Result, ZanzibarError},
    models::{validate_name, NamespaceConfig},
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const NAMESPACE_TREE: &str = "namespaces";
const KEY_PREFIX: &str = "zanzibar/namespaces/";

/// Versioned store of namespace schemas.
///
/// Each `store` appends a new version; earlier versions stay readable until
/// the whole namespace is deleted.
#[async_trait]
pub trait NamespaceRegistry: Send + Sync {
    /// Validate and append `config` as the next version, returning it with
    /// the assigned version number.
    async fn store(&self, config: NamespaceConfig) -> Result<NamespaceConfig>;

    async fn get(&self, namespace: &str) -> Result<NamespaceConfig>;

    async fn get_version(&self, namespace: &str, version: u64) -> Result<NamespaceConfig>;

    /// Sorted namespace names
    async fn list(&self) -> Result<Vec<String>>;

    /// Remove every version. Returns whether anything was stored.
    async fn delete(&self, namespace: &str) -> Result<bool>;

    async fn exists(&self, namespace: &str) -> Result<bool> {
        match self.get(namespace).await {
            Ok(_) => Ok(true),
            Err(ZanzibarError::NamespaceNotFound(_) | ZanzibarError::InvalidNamespace(_)) => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn relation_exists(&self, namespace: &str, relation: &str) -> Result<bool> {
        match self.get(namespace).await {
            Ok(config) => Ok(config.relation(relation).is_some()),
            Err(ZanzibarError::NamespaceNotFound(_) | ZanzibarError::InvalidNamespace(_)) => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

fn version_key(namespace: &str, version: u64) -> String {
    format!("{KEY_PREFIX}{namespace}/versions/{version}")
}

fn latest_key(namespace: &str) -> String {
    format!("{KEY_PREFIX}{namespace}/latest")
}

fn check_namespace(namespace: &str) -> Result<()> {
    validate_name("namespace", namespace).map_err(ZanzibarError::InvalidNamespace)
}

/// sled-backed [`NamespaceRegistry`] using the
/// `zanzibar/namespaces/{ns}/versions/{n}` and `zanzibar/namespaces/{ns}/latest`
/// key layout. The latest pointer holds the version as decimal text.
pub struct SledNamespaceRegistry {
    tree: sled::Tree,
    /// Serialises version bumps per namespace within this process
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SledNamespaceRegistry {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(NAMESPACE_TREE)?,
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, namespace: &str) -> Arc<Mutex<()>> {
        self.locks.entry(namespace.to_string()).or_default().clone()
    }

    fn latest_version(&self, namespace: &str) -> Result<Option<(sled::IVec, u64)>> {
        let Some(raw) = self.tree.get(latest_key(namespace).as_bytes())? else {
            return Ok(None);
        };
        let version = std::str::from_utf8(&raw)
            .ok()
            .and_then(|text| text.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                ZanzibarError::StorageError(format!(
                    "corrupt latest version pointer for namespace '{namespace}'"
                ))
            })?;
        Ok(Some((raw, version)))
    }

    fn read_version(&self, namespace: &str, version: u64) -> Result<Option<NamespaceConfig>> {
        self.tree
            .get(version_key(namespace, version).as_bytes())?
            .map(|raw| serde_json::from_slice(&raw).map_err(ZanzibarError::from))
            .transpose()
    }
}

#[async_trait]
impl NamespaceRegistry for SledNamespaceRegistry {
    async fn store(&self, mut config: NamespaceConfig) -> Result<NamespaceConfig> {
        config.validate()?;
        let namespace = config.namespace.clone();

        let lock = self.lock_for(&namespace);
        let _guard = lock.lock().await;

        let current = self.latest_version(&namespace)?;
        let previous = current.as_ref().map_or(0, |(_, version)| *version);
        config.version = previous + 1;

        let record_key = version_key(&namespace, config.version);
        let record = serde_json::to_vec(&config)?;
        if self
            .tree
            .compare_and_swap(record_key.as_bytes(), None::<&[u8]>, Some(record))?
            .is_err()
        {
            return Err(ZanzibarError::VersionConflict(format!(
                "namespace '{namespace}' version {} already exists",
                config.version
            )));
        }

        // The pointer swap is the commit point.
        let swapped = self.tree.compare_and_swap(
            latest_key(&namespace).as_bytes(),
            current.as_ref().map(|(raw, _)| raw),
            Some(config.version.to_string().into_bytes()),
        )?;
        if swapped.is_err() {
            warn!(namespace = %namespace, version = config.version, "Latest pointer moved during store");
            self.tree.remove(record_key.as_bytes())?;
            return Err(ZanzibarError::VersionConflict(format!(
                "namespace '{namespace}' was updated concurrently"
            )));
        }

        info!(namespace = %namespace, version = config.version, "Stored namespace configuration");
        Ok(config)
    }

    async fn get(&self, namespace: &str) -> Result<NamespaceConfig> {
        check_namespace(namespace)?;
        let (_, version) = self
            .latest_version(namespace)?
            .ok_or_else(|| ZanzibarError::NamespaceNotFound(namespace.to_string()))?;
        self.read_version(namespace, version)?.ok_or_else(|| {
            ZanzibarError::StorageError(format!(
                "namespace '{namespace}' points at missing version {version}"
            ))
        })
    }

    async fn get_version(&self, namespace: &str, version: u64) -> Result<NamespaceConfig> {
        check_namespace(namespace)?;
        if let Some(config) = self.read_version(namespace, version)? {
            return Ok(config);
        }
        if self.latest_version(namespace)?.is_none() {
            return Err(ZanzibarError::NamespaceNotFound(namespace.to_string()));
        }
        Err(ZanzibarError::VersionNotFound {
            namespace: namespace.to_string(),
            version,
        })
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for entry in self.tree.scan_prefix(KEY_PREFIX.as_bytes()) {
            let (key, _) = entry?;
            let key = String::from_utf8_lossy(&key);
            if let Some(name) = key
                .strip_prefix(KEY_PREFIX)
                .and_then(|rest| rest.split('/').next())
                .filter(|name| !name.is_empty())
            {
                names.insert(name.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn delete(&self, namespace: &str) -> Result<bool> {
        check_namespace(namespace)?;
        let lock = self.lock_for(namespace);
        let _guard = lock.lock().await;

        let mut batch = sled::Batch::default();
        let mut removed = 0usize;
        for entry in self.tree.scan_prefix(format!("{KEY_PREFIX}{namespace}/").as_bytes()) {
            let (key, _) = entry?;
            batch.remove(key);
            removed += 1;
        }
        self.tree.apply_batch(batch)?;

        debug!(namespace, removed, "Deleted namespace records");
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RelationRule, UnionTerm};

    fn doc_config() -> NamespaceConfig {
        NamespaceConfig::new("doc")
            .with_relation("owner", RelationRule::union(vec![UnionTerm::this()]))
            .with_relation(
                "viewer",
                RelationRule::union(vec![UnionTerm::this(), UnionTerm::computed_userset("owner")]),
            )
    }

    #[tokio::test]
    async fn test_versions_are_append_only() {
        let registry = SledNamespaceRegistry::temporary().unwrap();

        let first = registry.store(doc_config()).await.unwrap();
        assert_eq!(first.version, 1);

        let second = registry
            .store(NamespaceConfig::new("doc").with_relation("owner", RelationRule::default()))
            .await
            .unwrap();
        assert_eq!(second.version, 2);

        assert_eq!(registry.get("doc").await.unwrap().version, 2);
        let original = registry.get_version("doc", 1).await.unwrap();
        assert_eq!(original, first);
        assert!(original.relation("viewer").is_some());

        assert!(matches!(
            registry.get_version("doc", 7).await,
            Err(ZanzibarError::VersionNotFound { version: 7, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_namespace() {
        let registry = SledNamespaceRegistry::temporary().unwrap();
        assert!(matches!(
            registry.get("doc").await,
            Err(ZanzibarError::NamespaceNotFound(_))
        ));
        assert!(matches!(
            registry.get_version("doc", 1).await,
            Err(ZanzibarError::NamespaceNotFound(_))
        ));
        assert!(!registry.exists("doc").await.unwrap());
        assert!(!registry.relation_exists("doc", "owner").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let registry = SledNamespaceRegistry::temporary().unwrap();
        registry.store(doc_config()).await.unwrap();
        registry.store(doc_config()).await.unwrap();
        let mut docs = doc_config();
        docs.namespace = "docs".to_string();
        registry.store(docs).await.unwrap();
        let mut group = doc_config();
        group.namespace = "group".to_string();
        registry.store(group).await.unwrap();

        assert_eq!(registry.list().await.unwrap(), vec!["doc", "docs", "group"]);
        assert!(registry.relation_exists("doc", "viewer").await.unwrap());
        assert!(!registry.relation_exists("doc", "editor").await.unwrap());

        assert!(registry.delete("doc").await.unwrap());
        assert!(!registry.delete("doc").await.unwrap());
        assert_eq!(registry.list().await.unwrap(), vec!["docs", "group"]);
        assert!(registry.get_version("doc", 1).await.is_err());
        assert_eq!(registry.get("docs").await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_store_rejects_invalid_config() {
        let registry = SledNamespaceRegistry::temporary().unwrap();
        let dangling = NamespaceConfig::new("doc").with_relation(
            "viewer",
            RelationRule::union(vec![UnionTerm::computed_userset("editor")]),
        );
        assert!(matches!(
            registry.store(dangling).await,
            Err(ZanzibarError::ValidationError(_))
        ));
        assert!(registry.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_stores_get_distinct_versions() {
        let registry = Arc::new(SledNamespaceRegistry::temporary().unwrap());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.store(doc_config()).await.unwrap().version })
            })
            .collect();

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();

        assert_eq!(versions, (1..=16).collect::<Vec<u64>>());
        assert_eq!(registry.get("doc").await.unwrap().version, 16);
    }
}
